use crate::handler::{ObservedInstance, ObservedInstanceState};
use crate::transport::xml_text;

/// Parses every `<item>` inside a DescribeInstances/RunInstances-shaped
/// `<instancesSet>` block into [`ObservedInstance`] records. Quick-xml gives
/// us element text by tag name rather than a full DOM, so this walks the
/// document once per field rather than building a tree — acceptable given
/// these responses top out at a few hundred instances per call.
pub fn parse_instances_set(xml: &str) -> Vec<ObservedInstance> {
    split_items(xml, "item")
        .into_iter()
        .filter_map(|item_xml| {
            let instance_id = xml_text(&item_xml, "instanceId")?;
            let state_name = xml_text(&item_xml, "name").unwrap_or_default();
            let state = parse_instance_state(&state_name);
            let private_ip = xml_text(&item_xml, "privateIpAddress");
            let public_ip = xml_text(&item_xml, "ipAddress");
            let instance_type = xml_text(&item_xml, "instanceType");
            let availability_zone = xml_text(&item_xml, "availabilityZone");
            let spot = xml_text(&item_xml, "spotInstanceRequestId").is_some();
            Some(ObservedInstance {
                instance_id,
                state,
                private_ip,
                public_ip,
                instance_type,
                availability_zone,
                spot,
            })
        })
        .collect()
}

pub fn parse_instance_state(name: &str) -> ObservedInstanceState {
    match name {
        "pending" => ObservedInstanceState::Pending,
        "running" => ObservedInstanceState::Running,
        "stopping" => ObservedInstanceState::Stopping,
        "stopped" => ObservedInstanceState::Stopped,
        "shutting-down" => ObservedInstanceState::ShuttingDown,
        "terminated" => ObservedInstanceState::Terminated,
        _ => ObservedInstanceState::Unknown,
    }
}

/// Splits a document into the raw XML of each top-level occurrence of
/// `<tag>...</tag>`, used to isolate each `<item>` in an instance set before
/// pulling individual fields out of it with `xml_text`.
fn split_items(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut items = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after_open = &rest[start + open.len()..];
        if let Some(end) = after_open.find(&close) {
            items.push(after_open[..end].to_string());
            rest = &after_open[end + close.len()..];
        } else {
            break;
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <instancesSet>
            <item>
                <instanceId>i-0abc123</instanceId>
                <instanceState><name>running</name></instanceState>
                <privateIpAddress>10.0.0.5</privateIpAddress>
                <instanceType>m5.large</instanceType>
            </item>
            <item>
                <instanceId>i-0def456</instanceId>
                <instanceState><name>pending</name></instanceState>
                <privateIpAddress>10.0.0.6</privateIpAddress>
                <instanceType>m5.large</instanceType>
            </item>
        </instancesSet>
    "#;

    #[test]
    fn parses_each_instance_item() {
        let instances = parse_instances_set(SAMPLE);
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].instance_id, "i-0abc123");
        assert_eq!(instances[0].state, ObservedInstanceState::Running);
        assert_eq!(instances[1].state, ObservedInstanceState::Pending);
    }
}
