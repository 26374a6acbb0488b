//! TOSCA Parser
//!
//! Loads TOSCA Simple Profile service templates, resolves their types against
//! the normative catalog and any imported definitions, and validates every
//! template, property value, relationship and intrinsic function.
//!
//! ## Features
//!
//! - **Normative Catalog**: the standard node, relationship, capability, data,
//!   interface, artifact, group and policy types, embedded and flattened once
//! - **Custom Types**: document and imported definitions layered over the catalog
//! - **Data Validation**: primitives, scalar units, complex data types and constraints
//! - **Intrinsic Functions**: `get_input`, `get_property`, `get_attribute`,
//!   `get_operation_output`, `concat` and `token`
//! - **Diagnostics**: every problem in one pass, or fail fast on the first
//! - **CSAR**: zip archives with `TOSCA-Metadata/TOSCA.meta`
//!
//! ## Example
//!
//! ```no_run
//! use tosca_parser::{LoadOptions, ToscaTemplate};
//!
//! let options = LoadOptions::default().with_param("cpus", 8);
//! let template = ToscaTemplate::from_path("service.yaml", &options)?;
//! for node in template.nodetemplates() {
//!     println!("{}: {}", node.name, node.type_name);
//! }
//! if template.has_errors() {
//!     eprintln!("{}", template.diagnostics());
//! }
//! # Ok::<(), tosca_parser::ToscaError>(())
//! ```

pub mod catalog;
pub mod config;
pub mod constraint;
pub mod csar;
pub mod datatype;
pub mod diagnostics;
pub mod entity;
pub mod error;
pub mod functions;
pub mod imports;
pub mod scalar_unit;
pub mod schema;
pub mod template;
pub mod topology;
pub mod value;

pub use catalog::{CustomDefinitions, FlatType, TypeCatalog, TypeKind, TypeRegistry};
pub use config::ParserConfig;
pub use constraint::Constraint;
pub use csar::Csar;
pub use datatype::{validate_datatype, DataEntity};
pub use diagnostics::{DiagnosticItem, Diagnostics, Mode};
pub use entity::{
    Capability, Group, Input, InterfaceOperation, NodeTemplate, Output, Policy, Property, PropertyValue,
    Relationship, RelationshipTemplate, Requirement, SubstitutionMappings,
};
pub use error::{Result, ToscaError};
pub use functions::{get_function, is_function, Function, FunctionKind};
pub use imports::{DefaultFetcher, Fetcher, ImportResolver, Location};
pub use schema::Schema;
pub use template::{LoadOptions, ToscaTemplate};
pub use topology::{EntityRef, TopologyTemplate};
