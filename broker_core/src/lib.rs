#![recursion_limit = "1024"]
#![allow(non_snake_case)]

extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;

#[macro_use]
extern crate tera;

#[macro_use]
extern crate log;

#[macro_use]
extern crate error_chain;

/// Typed error kinds and their OSB/HTTP mapping.
pub mod error;
pub use error::{Error, ErrorKind, Result, ResultExt};

/// JSON-pointer tree manipulation used by the parameter pipeline.
pub mod node;

/// The declarative configuration model: catalog, templates, bindings.
pub mod config;
pub use config::{Config, ConfigBinding, Plan, ServiceOffering, Template, TemplateList};

/// Live-swappable holder of the current `Config`.
pub mod store;
pub use store::ConfigStore;

/// Per-instance/per-binding persistent key-value record.
pub mod registry;
pub use registry::{Entry, EntryKind, Registry};

/// Abstract typed dynamic CRUD over an orchestration substrate.
pub mod resource_store;
pub use resource_store::{GroupVersionKind, ResourceId, ResourceStore};

/// Snake-case wire rendering of the catalog.
pub mod catalog;

/// Parameter sources, destinations, the template language and the generators.
pub mod params;
pub use params::{Destination, Parameter, Source};

/// Per-instance in-flight async operation tracking.
pub mod operation;
pub use operation::{Operation, OperationKind, OperationManager};

/// The provision/update/deprovision/readiness engine.
pub mod provisioner;
pub use provisioner::Provisioner;

/// Bounded polling helpers for the readiness-check wait loop.
pub mod wait;
