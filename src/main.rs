//! Server binary: detect the device, wire the components, serve HTTP.

use agenthive::delegation::DelegationManager;
use agenthive::engine::AgentEngine;
use agenthive::error::HiveResult;
use agenthive::evaluator::Evaluator;
use agenthive::executor::PlanExecutor;
use agenthive::memory::SessionStore;
use agenthive::planner::TaskPlanner;
use agenthive::router::{Router, RouterProfiles};
use agenthive::sandbox::LocalProcessRunner;
use agenthive::server::{serve, AppState};
use agenthive::tools::build_registry;
use agenthive::{DeviceProfile, ServerConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> HiveResult<()> {
    env_logger::init();

    let config = ServerConfig::from_env();
    let device = DeviceProfile::detect(config.device_override.as_deref());
    log::info!(
        "device profile: {} ({}, ctx {}, {} threads, {} GPU layers)",
        device.kind.as_str(),
        device.model_name,
        device.context_window,
        device.threads,
        device.gpu_layers,
    );

    let memory_dir = config.memory_dir();
    let registry = build_registry(config.project_root.clone())?;

    let router = match &config.router_profiles_path {
        Some(path) => Router::with_profiles(RouterProfiles::from_json_file(path)?),
        None => Router::new(),
    };

    let evaluator = Arc::new(Evaluator::new(&memory_dir.join("evaluations.db"))?);
    let engine = Arc::new(AgentEngine::bootstrap(
        &config,
        &device,
        &registry,
        router,
        evaluator,
    ));

    let memory = Arc::new(SessionStore::new(memory_dir.clone())?);

    // Idle sessions are evicted in the background; persisted copies survive.
    let eviction_store = memory.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            ticker.tick().await;
            let evicted = eviction_store.evict_idle().await;
            if evicted > 0 {
                log::info!("evicted {} idle sessions", evicted);
            }
        }
    });
    let planner = Arc::new(TaskPlanner::new(
        engine_planning_client(&engine),
        memory_dir.clone(),
    )?);
    let plan_executor = Arc::new(PlanExecutor::new(engine.clone(), planner.clone()));
    let delegation = Arc::new(DelegationManager::new(engine.clone(), memory_dir)?);
    let sandbox = Arc::new(LocalProcessRunner::new(config.project_root.clone()));

    let state = Arc::new(AppState {
        engine,
        memory,
        planner,
        plan_executor,
        delegation,
        sandbox,
    });

    serve(state, &config.bind_addr).await
}

/// The planner prompts through the same local backend the reasoner uses.
fn engine_planning_client(
    engine: &Arc<AgentEngine>,
) -> Arc<dyn agenthive::ClientWrapper> {
    engine.local_client()
}
