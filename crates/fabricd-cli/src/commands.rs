use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use fabricd_domain::{Artifacts, ConfigId, ConfigKind, ConfigRecord};
use fabricd_engine::{Engine, EngineConfig};
use fabricd_inventory::{ConfigStore, DiskConfigStore};
use fabricd_southbound::{
    ConnManager, GnmiConnector, GrpcGnmiConnector, GrpcP4rtConnector, P4rtConnector, SimFabric,
};
use fabricd_topo::{InMemoryTopoStore, TopoObject, TopoStore};
use tokio::sync::mpsc;
use tracing::info;

use crate::cli::{FabricArg, KindArg};

impl From<KindArg> for ConfigKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Pipeline => ConfigKind::Pipeline,
            KindArg::Chassis => ConfigKind::Chassis,
        }
    }
}

pub async fn run(
    artifact_dir: PathBuf,
    realm_label: String,
    realm_value: String,
    topology: Option<PathBuf>,
    fabric: FabricArg,
) -> Result<()> {
    let inventory = Arc::new(DiskConfigStore::open(&artifact_dir)?);
    let topo = Arc::new(InMemoryTopoStore::new());

    let objects: Vec<TopoObject> = match &topology {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading topology seed {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing topology seed {}", path.display()))?
        }
        None => Vec::new(),
    };

    let (p4rt, gnmi): (Arc<dyn P4rtConnector>, Arc<dyn GnmiConnector>) = match fabric {
        FabricArg::Grpc => (
            Arc::new(GrpcP4rtConnector::new()),
            Arc::new(GrpcGnmiConnector::new()),
        ),
        FabricArg::Sim => {
            let sim = Arc::new(SimFabric::new());
            // One simulated device per distinct endpoint in the seed.
            for object in &objects {
                if let Some(agents) = &object.aspects.stratum_agents {
                    for endpoint in [&agents.p4rt_endpoint, &agents.gnmi_endpoint]
                        .into_iter()
                        .flatten()
                    {
                        if sim.switch(endpoint).await.is_none() {
                            sim.add_switch(endpoint, agents.device_id).await;
                        }
                    }
                }
            }
            (sim.clone(), sim)
        }
    };

    for object in objects {
        info!(id = %object.id, "seeding topology entity");
        topo.create(object).await?;
    }

    let conns = Arc::new(ConnManager::new(p4rt));
    let mut engine = Engine::new(
        EngineConfig::new(realm_label, realm_value),
        topo as Arc<dyn TopoStore>,
        inventory as Arc<dyn ConfigStore>,
        conns,
        gnmi,
    );
    engine.start();
    info!("engine running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    engine.stop().await;
    Ok(())
}

pub async fn config_add(
    artifact_dir: PathBuf,
    id: String,
    kind: KindArg,
    artifact_args: Vec<String>,
) -> Result<()> {
    let mut artifacts = Artifacts::new();
    for arg in &artifact_args {
        let Some((name, path)) = arg.split_once('=') else {
            bail!("artifact '{}' is not a NAME=PATH pair", arg);
        };
        let bytes =
            fs::read(path).with_context(|| format!("reading artifact file {}", path))?;
        artifacts.insert(name.to_string(), bytes);
    }

    let store = DiskConfigStore::open(&artifact_dir)?;
    let record = store
        .add(ConfigRecord::new(id, kind.into()), artifacts)
        .await?;
    println!(
        "added {} ({}): {}",
        record.config_id,
        record.kind,
        record.artifacts.join(", ")
    );
    Ok(())
}

pub async fn config_get(artifact_dir: PathBuf, id: String) -> Result<()> {
    let store = DiskConfigStore::open(&artifact_dir)?;
    let record = store.get(&ConfigId::new(id)).await?;
    let artifacts = store.get_artifacts(&record).await?;

    println!("{} ({})", record.config_id, record.kind);
    for (name, bytes) in &artifacts {
        println!("  {}: {} bytes", name, bytes.len());
    }
    Ok(())
}

pub async fn config_list(artifact_dir: PathBuf, kind: Option<KindArg>) -> Result<()> {
    let store = DiskConfigStore::open(&artifact_dir)?;
    let (tx, mut rx) = mpsc::channel(16);
    let lister = tokio::spawn(async move { store.list(kind.map(Into::into), tx).await });

    let mut count = 0usize;
    while let Some(record) = rx.recv().await {
        println!(
            "{}\t{}\t{}",
            record.config_id,
            record.kind,
            record.artifacts.join(",")
        );
        count += 1;
    }
    lister.await??;
    println!("{} configuration(s)", count);
    Ok(())
}

pub async fn config_delete(artifact_dir: PathBuf, id: String) -> Result<()> {
    let store = DiskConfigStore::open(&artifact_dir)?;
    store.delete(&ConfigId::new(id.clone())).await?;
    println!("deleted {}", id);
    Ok(())
}
