//! Property and material index over an [`EntityTable`].
//!
//! Relationship entities are followed at most two hops: relationship →
//! property set → single values, and relationship → material definition →
//! layer / material.

use super::parser::{unquote, EntityTable, IfcEntity};
use crate::error::{ConvertError, Result};
use std::collections::{BTreeMap, HashMap};

/// Type tags treated as building elements.
pub const BUILDING_ELEMENT_TYPES: &[&str] = &[
    "IFCWALL",
    "IFCWALLSTANDARDCASE",
    "IFCBEAM",
    "IFCCOLUMN",
    "IFCSLAB",
    "IFCDOOR",
    "IFCWINDOW",
    "IFCROOF",
    "IFCSTAIR",
    "IFCSTAIRFLIGHT",
    "IFCRAILING",
    "IFCRAMP",
    "IFCRAMPFLIGHT",
    "IFCPLATE",
    "IFCMEMBER",
    "IFCCOVERING",
    "IFCCURTAINWALL",
    "IFCFOOTING",
    "IFCPILE",
    "IFCBUILDINGELEMENTPROXY",
    "IFCFURNISHINGELEMENT",
    "IFCFLOWTERMINAL",
    "IFCFLOWSEGMENT",
    "IFCFLOWFITTING",
];

/// Property key under which a resolved material name is stored.
pub const MATERIAL_KEY: &str = "Material";

pub fn is_building_element(type_name: &str) -> bool {
    BUILDING_ELEMENT_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(type_name))
}

/// A recognized building element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementInfo {
    pub type_name: String,
    pub name: Option<String>,
    pub tag: Option<String>,
}

/// Flattened per-element properties and materials.
#[derive(Debug, Clone, Default)]
pub struct PropertyIndex {
    elements: BTreeMap<u32, ElementInfo>,
    properties: HashMap<u32, BTreeMap<String, String>>,
    materials: HashMap<u32, String>,
}

impl PropertyIndex {
    /// Parse exchange-file text and index it.
    ///
    /// Fails with `ExchangeParseFailure` when the file yields nothing usable,
    /// so callers can degrade to container-only annotations.
    pub fn from_text(content: &str) -> Result<Self> {
        let table = EntityTable::parse(content);
        if table.is_empty() {
            return Err(ConvertError::ExchangeParseFailure(
                "no entity declarations found".to_string(),
            ));
        }
        let index = Self::build(&table);
        if index.elements.is_empty() && index.properties.is_empty() {
            return Err(ConvertError::ExchangeParseFailure(format!(
                "{} entities but no building elements or property sets",
                table.len()
            )));
        }
        Ok(index)
    }

    /// Index all building elements, property relationships and material
    /// associations in scan order.
    pub fn build(table: &EntityTable) -> Self {
        let mut index = Self::default();

        for entity in table.iter() {
            if is_building_element(&entity.type_name) {
                index.elements.insert(
                    entity.id,
                    ElementInfo {
                        type_name: entity.type_name.clone(),
                        name: entity.string_arg(2),
                        tag: entity.string_arg(7),
                    },
                );
            }
        }

        for rel in table.entities_of_type("IFCRELDEFINESBYPROPERTIES") {
            let related = rel.ref_list_arg(4);
            let Some(definition) = rel.ref_arg(5).and_then(|id| table.get(id)) else {
                continue;
            };
            let values = property_values(table, definition);
            if values.is_empty() {
                continue;
            }
            for element in related {
                let entry = index.properties.entry(element).or_default();
                for (name, value) in &values {
                    entry.insert(name.clone(), value.clone());
                }
            }
        }

        for rel in table.entities_of_type("IFCRELASSOCIATESMATERIAL") {
            let Some(name) = rel.ref_arg(5).and_then(|id| material_name(table, id)) else {
                continue;
            };
            for element in rel.ref_list_arg(4) {
                index.materials.insert(element, name.clone());
            }
        }
        for (element, name) in &index.materials {
            index
                .properties
                .entry(*element)
                .or_default()
                .insert(MATERIAL_KEY.to_string(), name.clone());
        }

        tracing::debug!(
            elements = index.elements.len(),
            with_properties = index.properties.len(),
            with_material = index.materials.len(),
            "Indexed exchange file"
        );
        index
    }

    pub fn properties_for(&self, id: u32) -> Option<&BTreeMap<String, String>> {
        self.properties.get(&id)
    }

    pub fn material_for(&self, id: u32) -> Option<&str> {
        self.materials.get(&id).map(String::as_str)
    }

    pub fn element_name(&self, id: u32) -> Option<&str> {
        self.elements.get(&id).and_then(|e| e.name.as_deref())
    }

    pub fn element(&self, id: u32) -> Option<&ElementInfo> {
        self.elements.get(&id)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Find the building element whose name ends in `:<digits>` or whose tag
    /// carries the same identifier. The lowest entity id wins on ties.
    pub fn find_by_tag_suffix(&self, digits: &str) -> Option<u32> {
        if digits.is_empty() {
            return None;
        }
        let matches = |value: &str| {
            let suffix = value.rsplit_once(':').map_or(value, |(_, s)| s).trim();
            suffix == digits
        };
        self.elements.iter().find_map(|(id, element)| {
            let by_name = element
                .name
                .as_deref()
                .is_some_and(|name| name.contains(':') && matches(name));
            let by_tag = element.tag.as_deref().is_some_and(matches);
            (by_name || by_tag).then_some(*id)
        })
    }
}

/// Name/value pairs of a property set or element quantity.
fn property_values(table: &EntityTable, definition: &IfcEntity) -> Vec<(String, String)> {
    let (members, value_index) = match definition.type_name.as_str() {
        "IFCPROPERTYSET" => (definition.ref_list_arg(4), 2),
        "IFCELEMENTQUANTITY" => (definition.ref_list_arg(5), 3),
        _ => return Vec::new(),
    };

    members
        .into_iter()
        .filter_map(|id| table.get(id))
        .filter(|member| match value_index {
            2 => member.type_name == "IFCPROPERTYSINGLEVALUE",
            _ => member.type_name.starts_with("IFCQUANTITY"),
        })
        .filter_map(|member| {
            let name = member.string_arg(0)?;
            let value = normalize_value(member.arg(value_index)?)?;
            Some((name, value))
        })
        .collect()
}

/// Resolve a material definition to a display name.
fn material_name(table: &EntityTable, id: u32) -> Option<String> {
    let entity = table.get(id)?;
    match entity.type_name.as_str() {
        "IFCMATERIAL" => entity.string_arg(0),
        "IFCMATERIALLAYERSETUSAGE" => material_name(table, entity.ref_arg(0)?),
        // An unnamed set only resolves through a single layer
        "IFCMATERIALLAYERSET" => entity.string_arg(1).or_else(|| match entity.ref_list_arg(0).as_slice() {
            [layer] => material_name(table, *layer),
            _ => None,
        }),
        "IFCMATERIALLAYER" => {
            let material = table.get(entity.ref_arg(0)?)?;
            (material.type_name == "IFCMATERIAL")
                .then(|| material.string_arg(0))
                .flatten()
        }
        "IFCMATERIALLIST" => entity
            .ref_list_arg(0)
            .first()
            .and_then(|first| table.get(*first))
            .filter(|m| m.type_name == "IFCMATERIAL")
            .and_then(|m| m.string_arg(0)),
        _ => None,
    }
}

/// Normalize a nominal value argument to display text.
///
/// `IFCREAL(4.)` → `4`, `IFCLABEL('x')` → `x`, `IFCBOOLEAN(.T.)` → `true`.
pub fn normalize_value(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw == "$" || raw == "*" {
        return None;
    }
    let inner = strip_type_wrapper(raw).trim();

    if inner.starts_with('\'') {
        return unquote(inner);
    }
    if let Some(token) = inner.strip_prefix('.').and_then(|t| t.strip_suffix('.')) {
        return Some(match token.to_ascii_uppercase().as_str() {
            "T" | "TRUE" => "true".to_string(),
            "F" | "FALSE" => "false".to_string(),
            "U" | "UNKNOWN" => "unknown".to_string(),
            _ => token.to_string(),
        });
    }
    Some(normalize_number(inner))
}

/// `IFCREAL(4.)` → `4.`; anything else unchanged.
fn strip_type_wrapper(raw: &str) -> &str {
    let Some(open) = raw.find('(') else {
        return raw;
    };
    let name = &raw[..open];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return raw;
    }
    raw[open + 1..].strip_suffix(')').unwrap_or(raw)
}

/// Drop the exporter's bare trailing decimal point: `4.` → `4`, `1.E-05` → `1E-05`.
fn normalize_number(value: &str) -> String {
    let looks_numeric = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'E' | 'e'));
    if !looks_numeric {
        return value.to_string();
    }
    if let Some(stripped) = value.strip_suffix('.') {
        return stripped.to_string();
    }
    value.replace(".E", "E").replace(".e", "e")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "DATA;
#5= IFCBEAM('3cUkl32yn9qRSPvBJVyWYp',$,'W-Wide Flange:W12X26:424461',$,$,$,$,'424461');
#6= IFCWALL('1cUkl32yn9qRSPvBJVyWYp',$,'Basic Wall:Exterior:99',$,$,$,$,'99');
#12 = IFCPROPERTYSINGLEVALUE('Span','',IFCREAL(4.),$);
#13 = IFCPROPERTYSINGLEVALUE('LoadBearing',$,IFCBOOLEAN(.T.),$);
#14 = IFCPROPERTYSINGLEVALUE('Reference',$,IFCIDENTIFIER('W12X26'),$);
#15 = IFCPROPERTYSET('2a',$,'Pset_BeamCommon',$,(#12,#13,#14));
#16 = IFCRELDEFINESBYPROPERTIES('2b',$,$,$,(#5),#15);
#17 = IFCPROPERTYSINGLEVALUE('Span',$,IFCREAL(6.5),$);
#18 = IFCPROPERTYSET('2c',$,'Other',$,(#17));
#19 = IFCRELDEFINESBYPROPERTIES('2d',$,$,$,(#5,#6),#18);
#20 = IFCQUANTITYLENGTH('Length','',$,1.E-05,$);
#21 = IFCELEMENTQUANTITY('2e',$,'BaseQuantities',$,$,(#20));
#22 = IFCRELDEFINESBYPROPERTIES('2f',$,$,$,(#6),#21);
#30 = IFCMATERIAL('Steel',$,$);
#31 = IFCRELASSOCIATESMATERIAL('2g',$,$,$,(#5),#30);
#32 = IFCMATERIAL('Concrete');
#33 = IFCMATERIALLAYER(#32,200.,$);
#34 = IFCMATERIALLAYERSET((#33),$);
#35 = IFCMATERIALLAYERSETUSAGE(#34,.AXIS2.,.POSITIVE.,-100.);
#36 = IFCRELASSOCIATESMATERIAL('2h',$,$,$,(#6),#35);
ENDSEC;";

    #[test]
    fn test_single_value_with_trailing_dot() {
        let text = "#5= IFCWALL('g',$,'Wall:5',$,$,$,$,$);
#12 = IFCPROPERTYSINGLEVALUE('Span','',IFCREAL(4.),$);
#13 = IFCPROPERTYSET('p',$,'Pset',$,(#12));
#14 = IFCRELDEFINESBYPROPERTIES('r',$,$,$,(#5),#13);";
        let index = PropertyIndex::from_text(text).unwrap();
        let props = index.properties_for(5).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props["Span"], "4");
    }

    #[test]
    fn test_last_write_wins_in_scan_order() {
        let index = PropertyIndex::from_text(MODEL).unwrap();
        let beam = index.properties_for(5).unwrap();
        assert_eq!(beam["Span"], "6.5");
        assert_eq!(beam["LoadBearing"], "true");
        assert_eq!(beam["Reference"], "W12X26");
        assert_eq!(index.properties_for(6).unwrap()["Span"], "6.5");
    }

    #[test]
    fn test_quantities() {
        let index = PropertyIndex::from_text(MODEL).unwrap();
        assert_eq!(index.properties_for(6).unwrap()["Length"], "1E-05");
    }

    #[test]
    fn test_material_chain() {
        let index = PropertyIndex::from_text(MODEL).unwrap();
        assert_eq!(index.material_for(5), Some("Steel"));
        assert_eq!(index.material_for(6), Some("Concrete"));
        assert_eq!(index.properties_for(5).unwrap()[MATERIAL_KEY], "Steel");
    }

    #[test]
    fn test_layer_set_name_has_priority() {
        let text = "#1= IFCSLAB('g',$,'Floor:7',$,$,$,$,$);
#2 = IFCMATERIAL('Screed');
#3 = IFCMATERIALLAYER(#2,50.,$);
#4 = IFCMATERIALLAYERSET((#3),'Floor 250');
#5 = IFCRELASSOCIATESMATERIAL('r',$,$,$,(#1),#4);
#6 = IFCMATERIALLIST((#2));
#7 = IFCSLAB('h',$,'Floor:8',$,$,$,$,$);
#8 = IFCRELASSOCIATESMATERIAL('s',$,$,$,(#7),#6);";
        let index = PropertyIndex::from_text(text).unwrap();
        assert_eq!(index.material_for(1), Some("Floor 250"));
        assert_eq!(index.material_for(7), Some("Screed"));
    }

    #[test]
    fn test_unnamed_multi_layer_set_has_no_material() {
        let text = "#1= IFCWALL('g',$,'Wall:9',$,$,$,$,$);
#2 = IFCMATERIAL('Brick');
#3 = IFCMATERIAL('Insulation');
#4 = IFCMATERIALLAYER(#2,100.,$);
#5 = IFCMATERIALLAYER(#3,50.,$);
#6 = IFCMATERIALLAYERSET((#4,#5),$);
#7 = IFCRELASSOCIATESMATERIAL('r',$,$,$,(#1),#6);";
        let index = PropertyIndex::from_text(text).unwrap();
        assert_eq!(index.material_for(1), None);
        assert!(index
            .properties_for(1)
            .map_or(true, |props| !props.contains_key(MATERIAL_KEY)));
    }

    #[test]
    fn test_find_by_tag_suffix() {
        let index = PropertyIndex::from_text(MODEL).unwrap();
        assert_eq!(index.find_by_tag_suffix("424461"), Some(5));
        assert_eq!(index.find_by_tag_suffix("99"), Some(6));
        assert_eq!(index.find_by_tag_suffix("9"), None);
        assert_eq!(index.element_name(5), Some("W-Wide Flange:W12X26:424461"));
    }

    #[test]
    fn test_normalize_value() {
        assert_eq!(normalize_value("IFCTEXT('x')").as_deref(), Some("x"));
        assert_eq!(normalize_value("IFCBOOLEAN(.F.)").as_deref(), Some("false"));
        assert_eq!(normalize_value("IFCLENGTHMEASURE(-0.25)").as_deref(), Some("-0.25"));
        assert_eq!(normalize_value("IFCLABEL('a(b)')").as_deref(), Some("a(b)"));
        assert_eq!(normalize_value("$"), None);
    }

    #[test]
    fn test_unusable_input_is_an_exchange_failure() {
        assert!(matches!(
            PropertyIndex::from_text("hello"),
            Err(ConvertError::ExchangeParseFailure(_))
        ));
        assert!(matches!(
            PropertyIndex::from_text("#1 = IFCPERSON($,$,'x',$,$,$,$,$);"),
            Err(ConvertError::ExchangeParseFailure(_))
        ));
    }
}
