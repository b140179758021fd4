#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::aspects::*;
    use crate::types::*;

    #[test]
    fn kind_round_trips_through_str() {
        assert_eq!(ConfigKind::from_str("pipeline").unwrap(), ConfigKind::Pipeline);
        assert_eq!(ConfigKind::from_str("chassis").unwrap(), ConfigKind::Chassis);
        assert!(ConfigKind::from_str("bogus").is_err());
        assert_eq!(ConfigKind::Pipeline.as_str(), "pipeline");
    }

    #[test]
    fn action_parses_one_to_one() {
        for (s, a) in [
            ("verify", PipelineAction::Verify),
            ("verify_and_save", PipelineAction::VerifyAndSave),
            ("verify_and_commit", PipelineAction::VerifyAndCommit),
            ("commit", PipelineAction::Commit),
            ("reconcile_and_commit", PipelineAction::ReconcileAndCommit),
        ] {
            assert_eq!(PipelineAction::from_str(s).unwrap(), a);
            assert_eq!(a.to_string(), s);
        }
        assert!(PipelineAction::from_str("save").is_err());
    }

    #[test]
    fn default_action_is_verify_and_commit() {
        assert_eq!(PipelineAction::default(), PipelineAction::VerifyAndCommit);
    }

    #[test]
    fn default_status_is_pending() {
        assert_eq!(ConfigStatus::default(), ConfigStatus::Pending);
    }

    #[test]
    fn aspect_kind_matches_payload() {
        let a = Aspect::DeviceConfig(DeviceConfig {
            pipeline_config_id: Some(ConfigId::new("fp-v1")),
            ..Default::default()
        });
        assert_eq!(a.kind(), AspectKind::DeviceConfig);

        let a = Aspect::StratumAgents(StratumAgents {
            p4rt_endpoint: Some("fabric-sim:20000".into()),
            gnmi_endpoint: None,
            device_id: 1,
        });
        assert_eq!(a.kind(), AspectKind::StratumAgents);
    }

    #[test]
    fn record_serde_round_trip() {
        let mut record = ConfigRecord::new("foobar-v0.1.0", ConfigKind::Pipeline);
        record.artifacts = vec!["p4bin".into(), "p4info".into()];
        let json = serde_json::to_string(&record).unwrap();
        let back: ConfigRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
