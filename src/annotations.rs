//! Per-part annotations for AR display.

use crate::ifc::PropertyIndex;
use crate::scene::{SceneGraph, Transform};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metadata key for an element id parsed from a node name.
pub const ELEMENT_ID_KEY: &str = "revit_element_id";
/// Metadata key for the text preceding the bracketed element id.
pub const FAMILY_TYPE_KEY: &str = "family_type";

/// One labelled point of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Stable id derived from the node index, e.g. `node_3`.
    pub id: String,
    pub label: String,
    /// Model-space position in meters.
    pub position: [f32; 3],
    pub metadata: BTreeMap<String, String>,
}

/// Annotations plus enrichment counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSet {
    pub annotations: Vec<Annotation>,
    /// Annotations whose metadata came from the exchange file.
    pub enriched_count: usize,
    /// Annotations that kept container-derived metadata.
    pub container_only_count: usize,
}

impl AnnotationSet {
    /// Extract annotations from a graph and enrich them from an optional index.
    pub fn extract(graph: &SceneGraph, index: Option<&PropertyIndex>) -> Self {
        let mut annotations = extract(graph);
        let enriched_count = match index {
            Some(index) => enrich(&mut annotations, index),
            None => 0,
        };
        let container_only_count = annotations.len() - enriched_count;

        tracing::info!(
            annotations = annotations.len(),
            enriched = enriched_count,
            container_only = container_only_count,
            "Extracted annotations"
        );

        Self {
            annotations,
            enriched_count,
            container_only_count,
        }
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

/// One annotation per node with a non-empty name.
pub fn extract(graph: &SceneGraph) -> Vec<Annotation> {
    graph
        .nodes
        .iter()
        .enumerate()
        .filter_map(|(index, node)| {
            let label = node.name.as_deref()?.trim();
            if label.is_empty() {
                return None;
            }
            let position = match node.transform {
                Transform::Trs { translation, .. } => translation,
                Transform::Matrix(m) => [m[12], m[13], m[14]],
            };
            let metadata = node
                .extras
                .as_ref()
                .and_then(stringify_extras)
                .or_else(|| name_metadata(label))
                .unwrap_or_default();

            Some(Annotation {
                id: format!("node_{}", index),
                label: label.to_string(),
                position,
                metadata,
            })
        })
        .collect()
}

/// Replace metadata of annotations whose label carries an element id found
/// in the index. Returns how many were replaced.
pub fn enrich(annotations: &mut [Annotation], index: &PropertyIndex) -> usize {
    let mut enriched = 0;
    for annotation in annotations.iter_mut() {
        let Some((element_id, _)) = parse_element_id(&annotation.label) else {
            continue;
        };
        let properties = index
            .find_by_tag_suffix(&element_id)
            .and_then(|id| index.properties_for(id))
            .filter(|props| !props.is_empty());
        if let Some(properties) = properties {
            annotation.metadata = properties.clone();
            enriched += 1;
        }
    }
    enriched
}

/// Split `"Steel Beam [424461]"` into `("424461", "Steel Beam")`.
///
/// The first bracketed run of digits anywhere in the name is the id, so
/// `"Steel Beam [424461] (2)"` yields the same pair.
pub fn parse_element_id(name: &str) -> Option<(String, String)> {
    let mut search = 0;
    while let Some(open) = name[search..].find('[').map(|i| search + i) {
        let inner = &name[open + 1..];
        if let Some(close) = inner.find(']') {
            let digits = &inner[..close];
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return Some((digits.to_string(), name[..open].trim().to_string()));
            }
        }
        search = open + 1;
    }
    None
}

fn name_metadata(label: &str) -> Option<BTreeMap<String, String>> {
    let (element_id, family) = parse_element_id(label)?;
    Some(BTreeMap::from([
        (ELEMENT_ID_KEY.to_string(), element_id),
        (FAMILY_TYPE_KEY.to_string(), family),
    ]))
}

/// Stringify every value of a non-empty extras object.
fn stringify_extras(extras: &Value) -> Option<BTreeMap<String, String>> {
    let object = extras.as_object().filter(|o| !o.is_empty())?;
    Some(
        object
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::decode::{decode, tests::triangle_container};
    use crate::scene::Node;
    use serde_json::json;

    fn named_node(name: &str) -> Node {
        Node {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_name_fallback_metadata() {
        let graph = decode(&triangle_container([1.0; 4])).unwrap();
        let set = AnnotationSet::extract(&graph, None);
        assert_eq!(set.len(), 1);
        let annotation = &set.annotations[0];
        assert_eq!(annotation.id, "node_0");
        assert_eq!(annotation.position, [1.0, 2.0, 3.0]);
        assert_eq!(
            annotation.metadata,
            BTreeMap::from([
                ("revit_element_id".to_string(), "424461".to_string()),
                ("family_type".to_string(), "Steel Beam".to_string()),
            ])
        );
        assert_eq!(set.enriched_count, 0);
        assert_eq!(set.container_only_count, 1);
    }

    #[test]
    fn test_extras_take_priority_and_matrix_position() {
        let mut graph = SceneGraph::default();
        let mut node = named_node("Door [12]");
        node.extras = Some(json!({"ElementId": 12, "Level": "L1", "Fire": true}));
        let mut m = [0.0f32; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        m[12] = 4.0;
        m[13] = 5.0;
        m[14] = 6.0;
        node.transform = Transform::Matrix(m);
        graph.nodes.push(node);
        graph.nodes.push(named_node("   "));
        graph.nodes.push(Node::default());

        let annotations = extract(&graph);
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].position, [4.0, 5.0, 6.0]);
        assert_eq!(annotations[0].metadata["ElementId"], "12");
        assert_eq!(annotations[0].metadata["Level"], "L1");
        assert_eq!(annotations[0].metadata["Fire"], "true");
    }

    #[test]
    fn test_empty_extras_fall_back_to_name() {
        let mut graph = SceneGraph::default();
        let mut node = named_node("Wall");
        node.extras = Some(json!({}));
        graph.nodes.push(node);
        let annotations = extract(&graph);
        assert!(annotations[0].metadata.is_empty());
    }

    #[test]
    fn test_enrichment_replaces_metadata() {
        let index = PropertyIndex::from_text(
            "#5= IFCBEAM('g',$,'W-Wide Flange:W12X26:424461',$,$,$,$,$);
#12 = IFCPROPERTYSINGLEVALUE('Span','',IFCREAL(4.),$);
#13 = IFCPROPERTYSET('p',$,'Pset',$,(#12));
#14 = IFCRELDEFINESBYPROPERTIES('r',$,$,$,(#5),#13);",
        )
        .unwrap();

        let mut graph = SceneGraph::default();
        graph.nodes.push(named_node("Steel Beam [424461]"));
        graph.nodes.push(named_node("Column [777]"));
        let set = AnnotationSet::extract(&graph, Some(&index));

        assert_eq!(set.enriched_count, 1);
        assert_eq!(set.container_only_count, 1);
        assert_eq!(
            set.annotations[0].metadata,
            BTreeMap::from([("Span".to_string(), "4".to_string())])
        );
        assert_eq!(set.annotations[1].metadata[ELEMENT_ID_KEY], "777");
    }

    #[test]
    fn test_enrichment_with_text_after_id() {
        let index = PropertyIndex::from_text(
            "#5= IFCBEAM('g',$,'W-Wide Flange:W12X26:424461',$,$,$,$,$);
#12 = IFCPROPERTYSINGLEVALUE('Span','',IFCREAL(4.),$);
#13 = IFCPROPERTYSET('p',$,'Pset',$,(#12));
#14 = IFCRELDEFINESBYPROPERTIES('r',$,$,$,(#5),#13);",
        )
        .unwrap();

        let mut graph = SceneGraph::default();
        graph.nodes.push(named_node("Steel Beam [424461] (2)"));
        let set = AnnotationSet::extract(&graph, Some(&index));

        assert_eq!(set.enriched_count, 1);
        assert_eq!(set.annotations[0].metadata["Span"], "4");
    }

    #[test]
    fn test_parse_element_id() {
        assert_eq!(
            parse_element_id("Basic Wall [1234] "),
            Some(("1234".to_string(), "Basic Wall".to_string()))
        );
        assert_eq!(
            parse_element_id("Steel Beam [424461] (2)"),
            Some(("424461".to_string(), "Steel Beam".to_string()))
        );
        assert_eq!(
            parse_element_id("Door [A] [88]"),
            Some(("88".to_string(), "Door [A]".to_string()))
        );
        assert_eq!(parse_element_id("Wall [12a]"), None);
        assert_eq!(parse_element_id("Wall []"), None);
        assert_eq!(parse_element_id("Wall"), None);
    }

    #[test]
    fn test_serializes_to_json() {
        let set = AnnotationSet {
            annotations: vec![Annotation {
                id: "node_0".to_string(),
                label: "A".to_string(),
                position: [0.0, 1.0, 0.0],
                metadata: BTreeMap::new(),
            }],
            enriched_count: 0,
            container_only_count: 1,
        };
        let value = serde_json::to_value(&set).unwrap();
        assert_eq!(value["annotations"][0]["id"], "node_0");
        assert_eq!(value["container_only_count"], 1);
    }
}
