//! Concrete tool families and the registry bootstrap.
//!
//! [`build_registry`] declares every tool once against a project root:
//! file and code tools behind the [`guard::PathGuard`], system tools with
//! their denylist, web/osint tools over the shared HTTP client, and the
//! context-memory stores. Agents then take family-filtered views via
//! [`ToolRegistry::family_subset`](crate::tool_protocol::ToolRegistry::family_subset).

pub mod code;
pub mod file;
pub mod guard;
pub mod memory;
pub mod osint;
pub mod system;
pub mod web;

use crate::error::HiveResult;
use crate::tool_protocol::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;

/// Build the full tool catalog for a project root.
pub fn build_registry(project_root: PathBuf) -> HiveResult<ToolRegistry> {
    let guard = Arc::new(guard::PathGuard::new(project_root.clone())?);
    let context_memory = Arc::new(memory::ContextMemory::new(project_root.join("memory"))?);

    let mut registry = ToolRegistry::new();
    file::register(&mut registry, guard.clone())?;
    code::register(&mut registry, guard)?;
    system::register(&mut registry)?;
    web::register(&mut registry)?;
    osint::register(&mut registry)?;
    memory::register(&mut registry, context_memory)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use tempfile::TempDir;

    #[test]
    fn registry_covers_every_family() {
        let dir = TempDir::new().unwrap();
        let registry = build_registry(dir.path().to_path_buf()).unwrap();

        use crate::tool_protocol::ToolFamily::*;
        for family in [Code, File, System, Web, Osint, Memory] {
            assert!(
                !registry.family_subset(&[family]).is_empty(),
                "family {:?} has no tools",
                family
            );
        }
    }

    #[test]
    fn agent_grants_match_the_policy_table() {
        let dir = TempDir::new().unwrap();
        let registry = build_registry(dir.path().to_path_buf()).unwrap();

        let coder = registry.family_subset(AgentKind::Coder.tool_families());
        assert!(coder.get("edit_file").is_some());
        assert!(coder.get("bash").is_none());

        let executor = registry.family_subset(AgentKind::Executor.tool_families());
        assert!(executor.get("bash").is_some());
        assert!(executor.get("web_search").is_none());

        let reasoner = registry.family_subset(AgentKind::Reasoner.tool_families());
        assert!(reasoner.get("save_context").is_some());
        assert!(reasoner.get("read_file").is_none());

        let security = registry.family_subset(AgentKind::Security.tool_families());
        assert!(security.get("port_check").is_some());
        assert!(security.get("bash").is_some());
        assert!(security.get("edit_file").is_some());
    }

    #[test]
    fn curated_general_subset() {
        let dir = TempDir::new().unwrap();
        let registry = build_registry(dir.path().to_path_buf()).unwrap();
        let named = registry.named_subset(AgentKind::General.curated_tools());
        assert_eq!(named.len(), 3);
        assert!(named.get("web_search").is_some());
    }
}
