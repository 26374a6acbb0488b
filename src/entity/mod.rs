//! Template entities built from a topology document
//!
//! Every entity is built in one pass from its raw mapping: its type is
//! resolved through the [`TypeRegistry`](crate::catalog::TypeRegistry), its
//! values are validated against the flattened type, and problems are sent to
//! the [`Diagnostics`](crate::diagnostics::Diagnostics) context. Cross-template
//! references are held as arena ids owned by the topology.

pub mod capability;
pub mod group;
pub mod interface;
pub mod node_template;
pub mod parameters;
pub mod policy;
pub mod property;
pub mod relationship;
pub mod requirement;
pub mod substitution;

pub use capability::Capability;
pub use group::Group;
pub use interface::InterfaceOperation;
pub use node_template::NodeTemplate;
pub use parameters::{Input, Output};
pub use policy::Policy;
pub use property::{Property, PropertyValue};
pub use relationship::{Relationship, RelationshipTemplate};
pub use requirement::{RelationshipSpec, Requirement};
pub use substitution::SubstitutionMappings;

use serde_yaml::{Mapping, Value};

use crate::diagnostics::Diagnostics;
use crate::error::{Result, ToscaError};
use crate::value::unknown_keys;

// Template section keys
pub const TYPE: &str = "type";
pub const DESCRIPTION: &str = "description";
pub const METADATA: &str = "metadata";
pub const DIRECTIVES: &str = "directives";
pub const PROPERTIES: &str = "properties";
pub const ATTRIBUTES: &str = "attributes";
pub const REQUIREMENTS: &str = "requirements";
pub const CAPABILITIES: &str = "capabilities";
pub const INTERFACES: &str = "interfaces";
pub const ARTIFACTS: &str = "artifacts";
pub const NODE_FILTER: &str = "node_filter";
pub const MEMBERS: &str = "members";
pub const TARGETS: &str = "targets";
pub const TRIGGERS: &str = "triggers";

/// Report every key of `map` outside `allowed`
pub(crate) fn check_fields(map: &Mapping, allowed: &[&str], what: &str, diag: &mut Diagnostics) -> Result<()> {
    for key in unknown_keys(map, allowed) {
        diag.report(ToscaError::unknown(what, key))?;
    }
    Ok(())
}

/// The template body as a mapping; `null` is treated as empty
pub(crate) fn template_mapping(name: &str, raw: &Value) -> Result<Mapping> {
    match raw {
        Value::Mapping(m) => Ok(m.clone()),
        Value::Null => Ok(Mapping::new()),
        _ => Err(ToscaError::mismatch(format!("Template \"{}\"", name), "map")),
    }
}

/// Optional mapping-valued section of a template
pub(crate) fn section<'a>(
    map: &'a Mapping,
    key: &str,
    what: &str,
    diag: &mut Diagnostics,
) -> Result<Option<&'a Mapping>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Mapping(m)) => Ok(Some(m)),
        Some(_) => {
            diag.report(ToscaError::mismatch(format!("\"{}\" of {}", key, what), "map"))?;
            Ok(None)
        }
    }
}

/// Optional list of names (group members, policy targets)
pub(crate) fn name_list(map: &Mapping, key: &str, what: &str, diag: &mut Diagnostics) -> Result<Vec<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => Ok(items
            .iter()
            .map(crate::value::display)
            .collect()),
        Some(_) => {
            diag.report(ToscaError::mismatch(format!("\"{}\" of {}", key, what), "list"))?;
            Ok(Vec::new())
        }
    }
}
