//! End-to-end convergence scenarios against the simulated fabric.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fabricd_domain::{
    Aspect, ConfigId, ConfigKind, ConfigRecord, ConfigStatus, DeviceConfig, P4rtMastershipState,
    StratumAgents, TargetId,
};
use fabricd_engine::{Engine, EngineConfig};
use fabricd_inventory::{ConfigStore, DiskConfigStore};
use fabricd_southbound::proto::p4rt::{P4Info, PkgInfo};
use fabricd_southbound::{ConnManager, GnmiConnector, P4rtConnector, SimFabric, SimSwitch};
use fabricd_topo::{InMemoryTopoStore, TopoObject, TopoStore};
use prost::Message;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

const P4RT_ENDPOINT: &str = "fabric-sim:20000";
const GNMI_ENDPOINT: &str = "fabric-sim:20001";
const DEVICE_ID: u64 = 1;
const CONVERGE: Duration = Duration::from_secs(10);

struct Harness {
    _dir: TempDir,
    fabric: Arc<SimFabric>,
    topo: Arc<InMemoryTopoStore>,
    inventory: Arc<DiskConfigStore>,
    engine: Engine,
}

impl Harness {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let fabric = Arc::new(SimFabric::new());
        let topo = Arc::new(InMemoryTopoStore::new());
        let inventory = Arc::new(DiskConfigStore::open(dir.path()).unwrap());
        let conns = Arc::new(ConnManager::new(fabric.clone() as Arc<dyn P4rtConnector>));

        let mut config = EngineConfig::new("pod", "pod01");
        config.requeue_interval = Duration::from_millis(100);
        config.backoff_base = Duration::from_millis(20);
        config.backoff_cap = Duration::from_millis(200);

        let mut engine = Engine::new(
            config,
            topo.clone() as Arc<dyn TopoStore>,
            inventory.clone() as Arc<dyn ConfigStore>,
            conns,
            fabric.clone() as Arc<dyn GnmiConnector>,
        );
        engine.start();

        Self {
            _dir: dir,
            fabric,
            topo,
            inventory,
            engine,
        }
    }

    async fn add_switch(&self) -> Arc<SimSwitch> {
        let switch = self.fabric.add_switch(P4RT_ENDPOINT, DEVICE_ID).await;
        self.fabric.add_switch(GNMI_ENDPOINT, DEVICE_ID).await;
        switch
    }

    async fn add_pipeline_record(&self, id: &str, p4bin: &[u8]) {
        let artifacts = [
            ("p4info".to_string(), p4info_bytes(id)),
            ("p4bin".to_string(), p4bin.to_vec()),
        ]
        .into();
        self.inventory
            .add(ConfigRecord::new(id, ConfigKind::Pipeline), artifacts)
            .await
            .unwrap();
    }

    async fn add_chassis_record(&self, id: &str, chassis: &[u8]) {
        let artifacts = [("chassis".to_string(), chassis.to_vec())].into();
        self.inventory
            .add(ConfigRecord::new(id, ConfigKind::Chassis), artifacts)
            .await
            .unwrap();
    }

    async fn create_device(&self, name: &str, device_config: DeviceConfig) {
        self.topo
            .create(
                TopoObject::entity(name)
                    .label("pod", "pod01")
                    .aspect(Aspect::StratumAgents(StratumAgents {
                        p4rt_endpoint: Some(P4RT_ENDPOINT.to_string()),
                        gnmi_endpoint: Some(GNMI_ENDPOINT.to_string()),
                        device_id: DEVICE_ID,
                    }))
                    .aspect(Aspect::DeviceConfig(device_config)),
            )
            .await
            .unwrap();
    }

    async fn pipeline_status(&self, name: &str) -> Option<(ConfigStatus, u64, ConfigId)> {
        let object = self.topo.get(&TargetId::new(name)).await.ok()?;
        let state = object.aspects.pipeline_config_state?;
        Some((state.status, state.cookie, state.config_id))
    }

    async fn chassis_status(&self, name: &str) -> Option<ConfigStatus> {
        let object = self.topo.get(&TargetId::new(name)).await.ok()?;
        Some(object.aspects.chassis_config_state?.status)
    }
}

fn p4info_bytes(name: &str) -> Vec<u8> {
    P4Info {
        pkg_info: Some(PkgInfo {
            name: name.to_string(),
            version: "0.1.0".to_string(),
        }),
    }
    .encode_to_vec()
}

fn pipeline_intent(id: &str) -> DeviceConfig {
    DeviceConfig {
        pipeline_config_id: Some(ConfigId::new(id)),
        ..Default::default()
    }
}

async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + CONVERGE;
    loop {
        if condition().await {
            return;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_for_applied(harness: &Harness, name: &str) -> u64 {
    let h = harness;
    wait_until("pipeline applied", move || async move {
        matches!(
            h.pipeline_status(name).await,
            Some((ConfigStatus::Applied, cookie, _)) if cookie > 0
        )
    })
    .await;
    harness.pipeline_status(name).await.unwrap().1
}

#[tokio::test]
async fn s1_pipeline_happy_path() {
    let mut harness = Harness::start().await;
    let switch = harness.add_switch().await;

    harness
        .add_pipeline_record("foobar-v0.1.0", b"device binary A")
        .await;
    harness
        .create_device("spine1", pipeline_intent("foobar-v0.1.0"))
        .await;

    let cookie = wait_for_applied(&harness, "spine1").await;
    // The device observes the exact cookie the state records.
    assert_eq!(switch.pipeline_cookie(), cookie);
    assert_eq!(
        switch.applied_pipeline().unwrap().p4bin,
        b"device binary A".to_vec()
    );

    // Idempotence: steady-state re-checks never push again.
    let pushes = switch.set_pipeline_calls();
    sleep(Duration::from_millis(400)).await;
    assert_eq!(switch.set_pipeline_calls(), pushes);
    let (_, still_cookie, _) = harness.pipeline_status("spine1").await.unwrap();
    assert_eq!(still_cookie, cookie);

    harness.engine.stop().await;
}

#[tokio::test]
async fn s2_chassis_happy_path() {
    let mut harness = Harness::start().await;
    harness.add_switch().await;

    harness
        .add_chassis_record("chassis-v0.2.0", b"chassis bytes C")
        .await;
    harness
        .create_device(
            "spine2",
            DeviceConfig {
                chassis_config_id: Some(ConfigId::new("chassis-v0.2.0")),
                ..Default::default()
            },
        )
        .await;

    let h = &harness;
    wait_until("chassis applied", move || async move {
        h.chassis_status("spine2").await == Some(ConfigStatus::Applied)
    })
    .await;
    let switch = harness.fabric.switch(GNMI_ENDPOINT).await.unwrap();
    assert_eq!(switch.chassis_config().unwrap(), b"chassis bytes C".to_vec());

    harness.engine.stop().await;
}

#[tokio::test]
async fn s3_intent_change_rolls_the_cookie() {
    let mut harness = Harness::start().await;
    let switch = harness.add_switch().await;

    harness.add_pipeline_record("fp-v1", b"binary v1").await;
    harness.add_pipeline_record("fp-v2", b"binary v2").await;
    harness.create_device("spine1", pipeline_intent("fp-v1")).await;
    let old_cookie = wait_for_applied(&harness, "spine1").await;

    // Update the declared intent to the new record.
    let mut object = harness.topo.get(&TargetId::new("spine1")).await.unwrap();
    object.aspects.device_config = Some(pipeline_intent("fp-v2"));
    harness.topo.update(object).await.unwrap();

    let h = &harness;
    wait_until("new pipeline applied", move || async move {
        matches!(
            h.pipeline_status("spine1").await,
            Some((ConfigStatus::Applied, cookie, ref id))
                if cookie > 0 && cookie != old_cookie && id.as_str() == "fp-v2"
        )
    })
    .await;

    // The old cookie is no longer observed on the device.
    let (_, new_cookie, _) = harness.pipeline_status("spine1").await.unwrap();
    assert_eq!(switch.pipeline_cookie(), new_cookie);
    assert_ne!(switch.pipeline_cookie(), old_cookie);
    assert_eq!(switch.applied_pipeline().unwrap().p4bin, b"binary v2".to_vec());

    harness.engine.stop().await;
}

#[tokio::test]
async fn s4_missing_artifacts_stay_pending_until_added() {
    let mut harness = Harness::start().await;
    let switch = harness.add_switch().await;

    harness
        .create_device("spine1", pipeline_intent("fp-not-yet"))
        .await;

    let h = &harness;
    wait_until("pending recorded", move || async move {
        matches!(
            h.pipeline_status("spine1").await,
            Some((ConfigStatus::Pending, _, _))
        )
    })
    .await;

    // Retries happen, but nothing is ever pushed.
    sleep(Duration::from_millis(300)).await;
    assert!(matches!(
        harness.pipeline_status("spine1").await,
        Some((ConfigStatus::Pending, 0, _))
    ));
    assert_eq!(switch.set_pipeline_calls(), 0);

    // Adding the record resolves within a sweep.
    harness.add_pipeline_record("fp-not-yet", b"late binary").await;
    wait_for_applied(&harness, "spine1").await;

    harness.engine.stop().await;
}

#[tokio::test]
async fn s5_unreachable_device_fails_then_recovers() {
    let mut harness = Harness::start().await;
    let switch = harness.add_switch().await;

    harness.add_pipeline_record("fp-v1", b"binary v1").await;
    harness.create_device("spine1", pipeline_intent("fp-v1")).await;
    wait_for_applied(&harness, "spine1").await;

    switch.set_reachable(false);
    let h = &harness;
    wait_until("failure recorded", move || async move {
        matches!(
            h.pipeline_status("spine1").await,
            Some((ConfigStatus::Failed, _, _))
        )
    })
    .await;

    switch.set_reachable(true);
    let cookie = wait_for_applied(&harness, "spine1").await;
    assert_eq!(switch.pipeline_cookie(), cookie);

    harness.engine.stop().await;
}

#[tokio::test]
async fn s6_target_removal_closes_the_session() {
    let mut harness = Harness::start().await;
    harness.add_switch().await;

    harness.add_pipeline_record("fp-v1", b"binary v1").await;
    harness.create_device("spine1", pipeline_intent("fp-v1")).await;
    wait_for_applied(&harness, "spine1").await;
    assert!(harness
        .engine
        .conns()
        .get_by_target(&TargetId::new("spine1"))
        .await
        .is_ok());

    harness.topo.delete(&TargetId::new("spine1")).await.unwrap();
    let h = &harness;
    wait_until("session closed", move || async move {
        h.engine
            .conns()
            .get_by_target(&TargetId::new("spine1"))
            .await
            .is_err()
    })
    .await;

    harness.engine.stop().await;
}

#[tokio::test]
async fn device_reboot_reconverges_with_a_new_cookie() {
    let mut harness = Harness::start().await;
    let switch = harness.add_switch().await;

    harness.add_pipeline_record("fp-v1", b"binary v1").await;
    harness.create_device("spine1", pipeline_intent("fp-v1")).await;
    let old_cookie = wait_for_applied(&harness, "spine1").await;

    // Cookie drops to 0; the steady-state re-check must notice and redo.
    switch.reboot();
    let h = &harness;
    wait_until("re-applied after reboot", move || async move {
        matches!(
            h.pipeline_status("spine1").await,
            Some((ConfigStatus::Applied, cookie, _)) if cookie > 0 && cookie != old_cookie
        )
    })
    .await;
    assert!(switch.pipeline_cookie() > 0);

    harness.engine.stop().await;
}

#[tokio::test]
async fn mastership_term_bump_forces_a_new_apply() {
    let mut harness = Harness::start().await;
    let switch = harness.add_switch().await;

    harness.add_pipeline_record("fp-v1", b"binary v1").await;
    harness.create_device("spine1", pipeline_intent("fp-v1")).await;
    let old_cookie = wait_for_applied(&harness, "spine1").await;
    let pushes = switch.set_pipeline_calls();

    // An external mastership change with a higher term re-arms the state.
    let mut object = harness.topo.get(&TargetId::new("spine1")).await.unwrap();
    object.aspects.p4rt_mastership = Some(P4rtMastershipState {
        node_id: "other-node".to_string(),
        term: 7,
    });
    harness.topo.update(object).await.unwrap();

    let h = &harness;
    wait_until("re-applied after term bump", move || async move {
        matches!(
            h.pipeline_status("spine1").await,
            Some((ConfigStatus::Applied, cookie, _)) if cookie > 0 && cookie != old_cookie
        )
    })
    .await;
    assert!(switch.set_pipeline_calls() > pushes);

    let object = harness.topo.get(&TargetId::new("spine1")).await.unwrap();
    let state = object.aspects.pipeline_config_state.unwrap();
    assert_eq!(state.term, 7);
    assert_eq!(state.master.as_deref(), Some("other-node"));

    harness.engine.stop().await;
}
