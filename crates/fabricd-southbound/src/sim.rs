//! An in-process Stratum switch fleet. Backs the engine's standalone mode
//! and every test that needs a device on the other end of a session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fabricd_domain::PipelineAction;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::SouthboundError;
use crate::session::{
    Destination, ElectionId, GnmiClient, GnmiConnector, P4rtConnector, P4rtSession, PipelineSpec,
};

/// The pipeline a simulated switch last accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPipeline {
    pub action: PipelineAction,
    pub p4info: Vec<u8>,
    pub p4bin: Vec<u8>,
    pub cookie: u64,
}

/// One simulated device. Mastership goes to the highest election id seen;
/// the cookie is the only observable of the applied pipeline, and `reboot`
/// resets it to 0 the way a real device restart does.
pub struct SimSwitch {
    endpoint: String,
    device_id: u64,
    reachable: AtomicBool,
    cookie: AtomicU64,
    master: Mutex<Option<ElectionId>>,
    pipeline: Mutex<Option<AppliedPipeline>>,
    chassis: Mutex<Option<Vec<u8>>>,
    set_pipeline_calls: AtomicU64,
}

impl SimSwitch {
    fn new(endpoint: &str, device_id: u64) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            device_id,
            reachable: AtomicBool::new(true),
            cookie: AtomicU64::new(0),
            master: Mutex::new(None),
            pipeline: Mutex::new(None),
            chassis: Mutex::new(None),
            set_pipeline_calls: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Simulates a network partition; in-flight sessions start failing too.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Power-cycles the device: pipeline gone, cookie back to 0, mastership
    /// forgotten.
    pub fn reboot(&self) {
        self.cookie.store(0, Ordering::SeqCst);
        *self.master.lock().expect("master lock poisoned") = None;
        *self.pipeline.lock().expect("pipeline lock poisoned") = None;
    }

    pub fn pipeline_cookie(&self) -> u64 {
        self.cookie.load(Ordering::SeqCst)
    }

    pub fn applied_pipeline(&self) -> Option<AppliedPipeline> {
        self.pipeline.lock().expect("pipeline lock poisoned").clone()
    }

    pub fn chassis_config(&self) -> Option<Vec<u8>> {
        self.chassis.lock().expect("chassis lock poisoned").clone()
    }

    /// Number of SetForwardingPipelineConfig calls accepted so far.
    pub fn set_pipeline_calls(&self) -> u64 {
        self.set_pipeline_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), SouthboundError> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(SouthboundError::Transport(format!(
                "{}: device unreachable",
                self.endpoint
            )))
        }
    }
}

/// The fleet, addressed by endpoint. Implements both southbound connector
/// seams so it can stand in for real devices end to end.
#[derive(Default)]
pub struct SimFabric {
    switches: RwLock<HashMap<String, Arc<SimSwitch>>>,
}

impl SimFabric {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_switch(&self, endpoint: &str, device_id: u64) -> Arc<SimSwitch> {
        let switch = Arc::new(SimSwitch::new(endpoint, device_id));
        self.switches
            .write()
            .await
            .insert(endpoint.to_string(), switch.clone());
        switch
    }

    pub async fn switch(&self, endpoint: &str) -> Option<Arc<SimSwitch>> {
        self.switches.read().await.get(endpoint).cloned()
    }

    async fn lookup(&self, endpoint: &str) -> Result<Arc<SimSwitch>, SouthboundError> {
        let switch = self.switch(endpoint).await.ok_or_else(|| {
            SouthboundError::Transport(format!("no device listening at {}", endpoint))
        })?;
        switch.check_reachable()?;
        Ok(switch)
    }
}

struct SimSession {
    switch: Arc<SimSwitch>,
    election: Mutex<Option<ElectionId>>,
}

#[async_trait]
impl P4rtSession for SimSession {
    async fn arbitrate(&self, election_id: ElectionId) -> Result<(), SouthboundError> {
        self.switch.check_reachable()?;
        let mut master = self.switch.master.lock().expect("master lock poisoned");
        match *master {
            Some(current) if current > election_id => Err(SouthboundError::NotMaster(format!(
                "{}: election {} lost to {}",
                self.switch.endpoint, election_id, current
            ))),
            _ => {
                *master = Some(election_id);
                *self.election.lock().expect("election lock poisoned") = Some(election_id);
                debug!(endpoint = %self.switch.endpoint, election_id = %election_id, "arbitration won");
                Ok(())
            }
        }
    }

    async fn pipeline_cookie(&self) -> Result<u64, SouthboundError> {
        self.switch.check_reachable()?;
        Ok(self.switch.pipeline_cookie())
    }

    async fn set_pipeline(&self, spec: PipelineSpec) -> Result<(), SouthboundError> {
        self.switch.check_reachable()?;
        let election = self
            .election
            .lock()
            .expect("election lock poisoned")
            .ok_or_else(|| {
                SouthboundError::NotMaster(format!("{}: not arbitrated", self.switch.endpoint))
            })?;
        let master = *self.switch.master.lock().expect("master lock poisoned");
        if master != Some(election) {
            return Err(SouthboundError::NotMaster(format!(
                "{}: mastership superseded",
                self.switch.endpoint
            )));
        }

        self.switch.cookie.store(spec.cookie, Ordering::SeqCst);
        *self.switch.pipeline.lock().expect("pipeline lock poisoned") = Some(AppliedPipeline {
            action: spec.action,
            p4info: spec.p4info,
            p4bin: spec.p4bin,
            cookie: spec.cookie,
        });
        self.switch.set_pipeline_calls.fetch_add(1, Ordering::SeqCst);
        debug!(endpoint = %self.switch.endpoint, cookie = spec.cookie, "pipeline applied");
        Ok(())
    }

    async fn close(&self) {
        *self.election.lock().expect("election lock poisoned") = None;
    }
}

#[async_trait]
impl P4rtConnector for SimFabric {
    async fn open(&self, dest: &Destination) -> Result<Arc<dyn P4rtSession>, SouthboundError> {
        let switch = self.lookup(&dest.endpoint).await?;
        if switch.device_id != dest.device_id {
            return Err(SouthboundError::Invalid(format!(
                "{}: device id mismatch, have {} want {}",
                dest.endpoint, switch.device_id, dest.device_id
            )));
        }
        Ok(Arc::new(SimSession {
            switch,
            election: Mutex::new(None),
        }))
    }
}

struct SimGnmi {
    switch: Arc<SimSwitch>,
}

#[async_trait]
impl GnmiClient for SimGnmi {
    async fn set_root(&mut self, config: &[u8]) -> Result<(), SouthboundError> {
        self.switch.check_reachable()?;
        *self.switch.chassis.lock().expect("chassis lock poisoned") = Some(config.to_vec());
        debug!(endpoint = %self.switch.endpoint, bytes = config.len(), "chassis config replaced");
        Ok(())
    }
}

#[async_trait]
impl GnmiConnector for SimFabric {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn GnmiClient>, SouthboundError> {
        let switch = self.lookup(endpoint).await?;
        Ok(Box::new(SimGnmi { switch }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest(endpoint: &str) -> Destination {
        Destination {
            target_id: fabricd_domain::TargetId::new("spine1"),
            endpoint: endpoint.to_string(),
            device_id: 1,
            role_name: "provisioner".to_string(),
        }
    }

    fn spec(cookie: u64) -> PipelineSpec {
        PipelineSpec {
            action: PipelineAction::VerifyAndCommit,
            p4info: b"info".to_vec(),
            p4bin: b"bin".to_vec(),
            cookie,
        }
    }

    #[tokio::test]
    async fn highest_election_id_wins_mastership() {
        let fabric = SimFabric::new();
        fabric.add_switch("sw1:20000", 1).await;

        let a = P4rtConnector::open(&fabric, &dest("sw1:20000")).await.unwrap();
        let b = P4rtConnector::open(&fabric, &dest("sw1:20000")).await.unwrap();

        a.arbitrate(ElectionId(10)).await.unwrap();
        b.arbitrate(ElectionId(20)).await.unwrap();
        // A stale id no longer wins.
        assert!(a.arbitrate(ElectionId(15)).await.unwrap_err().is_not_master());
    }

    #[tokio::test]
    async fn superseded_master_cannot_push() {
        let fabric = SimFabric::new();
        let switch = fabric.add_switch("sw1:20000", 1).await;

        let a = P4rtConnector::open(&fabric, &dest("sw1:20000")).await.unwrap();
        let b = P4rtConnector::open(&fabric, &dest("sw1:20000")).await.unwrap();

        a.arbitrate(ElectionId(10)).await.unwrap();
        b.arbitrate(ElectionId(20)).await.unwrap();

        assert!(a.set_pipeline(spec(7)).await.unwrap_err().is_not_master());
        b.set_pipeline(spec(7)).await.unwrap();
        assert_eq!(switch.pipeline_cookie(), 7);
        assert_eq!(switch.set_pipeline_calls(), 1);
    }

    #[tokio::test]
    async fn reboot_resets_cookie_to_zero() {
        let fabric = SimFabric::new();
        let switch = fabric.add_switch("sw1:20000", 1).await;

        let session = P4rtConnector::open(&fabric, &dest("sw1:20000")).await.unwrap();
        session.arbitrate(ElectionId(1)).await.unwrap();
        session.set_pipeline(spec(99)).await.unwrap();
        assert_eq!(switch.pipeline_cookie(), 99);

        switch.reboot();
        assert_eq!(switch.pipeline_cookie(), 0);
        assert!(switch.applied_pipeline().is_none());
    }

    #[tokio::test]
    async fn unreachable_device_fails_every_call() {
        let fabric = SimFabric::new();
        let switch = fabric.add_switch("sw1:20000", 1).await;

        let session = P4rtConnector::open(&fabric, &dest("sw1:20000")).await.unwrap();
        session.arbitrate(ElectionId(1)).await.unwrap();

        switch.set_reachable(false);
        assert!(matches!(
            session.pipeline_cookie().await,
            Err(SouthboundError::Transport(_))
        ));
        assert!(matches!(
            P4rtConnector::open(&fabric, &dest("sw1:20000")).await,
            Err(SouthboundError::Transport(_))
        ));

        switch.set_reachable(true);
        assert_eq!(session.pipeline_cookie().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn gnmi_set_replaces_chassis_config() {
        let fabric = SimFabric::new();
        let switch = fabric.add_switch("sw1:20001", 1).await;

        let mut client = GnmiConnector::open(&fabric, "sw1:20001").await.unwrap();
        client.set_root(b"chassis bytes").await.unwrap();
        assert_eq!(switch.chassis_config().unwrap(), b"chassis bytes".to_vec());
    }
}
