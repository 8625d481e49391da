//! Node metadata published to a visual-programming host.
//!
//! The host discovers nodes through an explicit registration call with a
//! static description record; nothing is looked up at runtime.

use serde::Serialize;

use crate::error::Result;

/// Static description of a host node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: &'static str,
    pub category: &'static str,
    pub version: &'static str,
    pub author: &'static str,
    pub help: &'static str,
    pub tags: &'static str,
    pub credits: &'static str,
    pub bugs: &'static str,
    pub warnings: &'static str,
    pub namespace: &'static str,
    pub class: &'static str,
}

impl PluginInfo {
    /// The host's display name, e.g. `QueryBatch (Odbc Network)`.
    pub fn system_name(&self) -> String {
        if self.version.is_empty() {
            format!("{} ({})", self.name, self.category)
        } else {
            format!("{} ({} {})", self.name, self.category, self.version)
        }
    }
}

/// Metadata of the batch query node.
pub static QUERY_BATCH: PluginInfo = PluginInfo {
    name: "QueryBatch",
    category: "Odbc",
    version: "Network",
    author: "vux, microdee",
    help: "Executes a batch of queries on a ODBC database",
    tags: "database",
    credits: "",
    bugs: "",
    warnings: "",
    namespace: module_path!(),
    class: "QueryBatchNode",
};

/// The host side of node registration.
pub trait NodeRegistry {
    fn register_node(&mut self, info: &'static PluginInfo) -> Result<()>;
}

/// Registers every node this crate provides.
pub fn register(registry: &mut dyn NodeRegistry) -> Result<()> {
    registry.register_node(&QUERY_BATCH)
}
