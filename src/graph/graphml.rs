//! GraphML export for downstream graph tools

use super::builder::TransactionGraph;
use crate::error::Result;
use std::io::Write;
use tracing::debug;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Serialize the graph as GraphML: nodes, edges, and edge attributes.
///
/// Edge times are joined with `;` since GraphML attributes are scalar.
pub fn write_graphml<W: Write>(graph: &TransactionGraph, mut out: W) -> Result<()> {
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        out,
        r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns">"#
    )?;
    writeln!(
        out,
        r#"  <key id="amount" for="edge" attr.name="amount" attr.type="double"/>"#
    )?;
    writeln!(
        out,
        r#"  <key id="transfer_count" for="edge" attr.name="transfer_count" attr.type="long"/>"#
    )?;
    writeln!(
        out,
        r#"  <key id="time" for="edge" attr.name="time" attr.type="string"/>"#
    )?;
    writeln!(out, r#"  <graph id="transactions" edgedefault="directed">"#)?;

    for node in graph.nodes() {
        writeln!(out, r#"    <node id="{}"/>"#, escape(node))?;
    }

    for (sender, receiver, flow) in graph.edges() {
        writeln!(
            out,
            r#"    <edge source="{}" target="{}">"#,
            escape(sender),
            escape(receiver)
        )?;
        writeln!(out, r#"      <data key="amount">{}</data>"#, flow.amount)?;
        writeln!(
            out,
            r#"      <data key="transfer_count">{}</data>"#,
            flow.transfer_count
        )?;
        if !flow.times.is_empty() {
            writeln!(
                out,
                r#"      <data key="time">{}</data>"#,
                escape(&flow.times.join(";"))
            )?;
        }
        writeln!(out, "    </edge>")?;
    }

    writeln!(out, "  </graph>")?;
    writeln!(out, "</graphml>")?;
    out.flush()?;
    debug!(nodes = graph.node_count(), edges = graph.edge_count(), "GraphML encoded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::EdgePolicy;

    #[test]
    fn test_graphml_contents() {
        let mut graph = TransactionGraph::new();
        graph.add_transfer("A", "B&Co", 100.0, Some("2024-12-15"), EdgePolicy::Sum);
        graph.add_transfer("A", "B&Co", 50.0, Some("2024-12-16"), EdgePolicy::Sum);

        let mut buffer = Vec::new();
        write_graphml(&graph, &mut buffer).unwrap();
        let xml = String::from_utf8(buffer).unwrap();

        assert!(xml.contains(r#"<node id="A"/>"#));
        assert!(xml.contains(r#"<node id="B&amp;Co"/>"#));
        assert!(xml.contains(r#"<edge source="A" target="B&amp;Co">"#));
        assert!(xml.contains(r#"<data key="amount">150</data>"#));
        assert!(xml.contains("2024-12-15;2024-12-16"));
        assert!(xml.trim_end().ends_with("</graphml>"));
    }
}
