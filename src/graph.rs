// graph.rs - Force-graph data for the UI
// Hosts and their open ports as nodes, with the default gateway linked to every host.

use crate::model::Scan;
use crate::nmap::default_gateway;
use serde::Serialize;
use serde_json::{Map, Value, json};

#[derive(Debug, Default, Serialize)]
pub struct Graph {
    pub nodes: Vec<Value>,
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub source: String,
    pub target: String,
    pub value: u32,
}

impl Link {
    fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            value: 1,
        }
    }
}

/// `{extra..., fields of value..., group}`
fn node<T: Serialize>(extra: Value, fields: &T, group: u8) -> Value {
    let mut map = match extra {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Ok(Value::Object(own)) = serde_json::to_value(fields) {
        map.extend(own);
    }
    map.insert("group".to_string(), json!(group));
    Value::Object(map)
}

/// `<a.b.c>.1` of the first host
pub fn fallback_gateway(scan: &Scan) -> Option<String> {
    let first = scan.hosts.first()?;
    let octets: Vec<&str> = first.ip.split('.').collect();
    (octets.len() == 4).then(|| format!("{}.{}.{}.1", octets[0], octets[1], octets[2]))
}

/// Default route from `nmap --iflist` output, else the assumed .1 of the scanned network
pub fn resolve_gateway(iflist: Option<&str>, scan: &Scan) -> Option<String> {
    iflist.and_then(default_gateway).or_else(|| fallback_gateway(scan))
}

pub fn build_graph(scan: &Scan, gateway: Option<&str>) -> Graph {
    let mut graph = Graph::default();

    for host in &scan.hosts {
        graph
            .nodes
            .push(node(json!({"id": host.ip, "type": "host"}), host, 1));

        let last_octet = host.ip.rsplit('.').next().unwrap_or(&host.ip);
        for port in &host.open_ports {
            let id = format!("{}_{}", last_octet, port.port);
            graph.nodes.push(node(
                json!({"id": id, "name": port.port, "host": host.ip, "type": "port"}),
                port,
                2,
            ));
            graph.links.push(Link::new(&host.ip, &id));
        }
    }

    let Some(gateway) = gateway else {
        return graph;
    };

    if !graph.nodes.iter().any(|n| n["id"] == gateway) {
        graph.nodes.push(json!({
            "id": gateway,
            "host": gateway,
            "ip": gateway,
            "type": "host",
            "hostname": "Gateway",
            "group": 0,
        }));
    }

    for host in scan.hosts.iter().filter(|h| h.ip != gateway) {
        graph.links.push(Link::new(gateway, &host.ip));
    }

    graph
}
