use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use replicamgr::{
    BrokerId, ControllerEpoch, ElectionType, Isolation, LeaderEpoch, LeaderOnlySelector,
    LogFactory, LogRecord, LogStore, ManualClock, MemoryLogStore, NoCheckpoints,
    PartitionDirective, ReplicaManager, ReplicaManagerConfig, ReplicaManagerError, TopicPartition,
};
use replicamgr_storage::InMemoryMetadataCache;

struct MemoryLogFactory;
impl LogFactory for MemoryLogFactory {
    fn create(&self, _tp: &TopicPartition) -> Box<dyn LogStore> {
        Box::new(MemoryLogStore::new())
    }
}

fn manager_with_clock(clock: Arc<ManualClock>, config: ReplicaManagerConfig) -> ReplicaManager {
    ReplicaManager::new(
        BrokerId(1),
        config,
        Arc::new(InMemoryMetadataCache::new()),
        Box::new(LeaderOnlySelector),
        clock,
    )
}

fn tp(p: u32) -> TopicPartition {
    TopicPartition::new("orders", p)
}

fn become_leader(
    manager: &ReplicaManager,
    tp: TopicPartition,
    replicas: Vec<BrokerId>,
    isr: Vec<BrokerId>,
    leader_epoch: u32,
) {
    manager
        .become_leader_or_follower(
            BrokerId(0),
            ControllerEpoch(1),
            vec![PartitionDirective {
                topic_partition: tp,
                leader: BrokerId(1),
                leader_epoch: LeaderEpoch(leader_epoch),
                isr,
                replicas,
                is_new: true,
            }],
            &MemoryLogFactory,
            &NoCheckpoints,
            |_, _| {},
        )
        .unwrap();
}

#[test]
fn scenario_1_leader_single_replica_acks1_produce() {
    let clock = Arc::new(ManualClock::new(0));
    let manager = manager_with_clock(clock, ReplicaManagerConfig::default());
    become_leader(&manager, tp(0), vec![BrokerId(1)], vec![BrokerId(1)], 1);

    let mut entries = HashMap::new();
    entries.insert(
        tp(0),
        vec![
            LogRecord::new(None, b"a".to_vec()),
            LogRecord::new(None, b"b".to_vec()),
            LogRecord::new(None, b"c".to_vec()),
        ],
    );

    let offsets = Arc::new(std::sync::Mutex::new(None));
    let o = offsets.clone();
    manager
        .append_records(0, 1, false, entries, move |results| {
            let result = results.get(&tp(0)).unwrap().as_ref().unwrap();
            *o.lock().unwrap() = Some((result.first_offset, result.last_offset));
        })
        .unwrap();
    assert_eq!(*offsets.lock().unwrap(), Some((0, 2)));

    // Dummy self-fetch advances HW to LEO.
    manager
        .fetch_one_partition(&tp(0), 1, 3, None, 1024, Isolation::LogEnd, false)
        .unwrap();
    let snapshot = manager.describe_log_dirs();
    assert_eq!(snapshot.get(&tp(0)).unwrap().high_watermark, 3);
}

#[test]
fn scenario_2_leader_advances_hw_on_follower_catchup() {
    let clock = Arc::new(ManualClock::new(0));
    let manager = manager_with_clock(clock, ReplicaManagerConfig::default());
    become_leader(
        &manager,
        tp(0),
        vec![BrokerId(1), BrokerId(2)],
        vec![BrokerId(1), BrokerId(2)],
        1,
    );

    let mut entries = HashMap::new();
    entries.insert(
        tp(0),
        (0..5)
            .map(|i| LogRecord::new(None, vec![i as u8]))
            .collect(),
    );

    let completed = Arc::new(AtomicUsize::new(0));
    let c = completed.clone();
    manager
        .append_records(60_000, -1, false, entries, move |results| {
            assert!(results.get(&tp(0)).unwrap().is_ok());
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    // Not completed yet: HW hasn't advanced (min ISR LEO is 0).
    assert_eq!(completed.load(Ordering::SeqCst), 0);

    manager
        .fetch_one_partition(&tp(0), 2, 5, None, 1024, Isolation::LogEnd, false)
        .unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 1);
    let snapshot = manager.describe_log_dirs();
    assert_eq!(snapshot.get(&tp(0)).unwrap().high_watermark, 5);
}

#[test]
fn scenario_3_isr_shrinks_on_stale_follower() {
    let clock = Arc::new(ManualClock::new(0));
    let mut config = ReplicaManagerConfig::default();
    config.replica_lag_time_max_ms = 10_000;
    let manager = manager_with_clock(clock.clone(), config);
    become_leader(
        &manager,
        tp(0),
        vec![BrokerId(1), BrokerId(2)],
        vec![BrokerId(1), BrokerId(2)],
        1,
    );

    clock.advance_ms(11_000);
    manager.maybe_shrink_isrs();

    let snapshot = manager.describe_log_dirs();
    assert_eq!(snapshot.get(&tp(0)).unwrap().isr, vec![BrokerId(1)]);
}

#[test]
fn scenario_4_follower_fetch_with_fenced_epoch() {
    let clock = Arc::new(ManualClock::new(0));
    let manager = manager_with_clock(clock, ReplicaManagerConfig::default());
    become_leader(&manager, tp(0), vec![BrokerId(1)], vec![BrokerId(1)], 5);

    let err = manager
        .fetch_one_partition(&tp(0), -1, 0, Some(LeaderEpoch(4)), 1024, Isolation::HighWatermark, false)
        .unwrap_err();
    assert!(matches!(err, ReplicaManagerError::UnknownLeaderEpoch { .. }));

    let err = manager
        .fetch_one_partition(&tp(0), -1, 0, Some(LeaderEpoch(6)), 1024, Isolation::HighWatermark, false)
        .unwrap_err();
    assert!(matches!(err, ReplicaManagerError::FencedLeaderEpoch { .. }));
}

#[test]
fn scenario_5_stale_controller_directive_rejects_whole_batch_and_mutates_nothing() {
    let clock = Arc::new(ManualClock::new(0));
    let manager = manager_with_clock(clock, ReplicaManagerConfig::default());
    manager
        .become_leader_or_follower(
            BrokerId(0),
            ControllerEpoch(7),
            vec![],
            &MemoryLogFactory,
            &NoCheckpoints,
            |_, _| {},
        )
        .unwrap();

    let err = manager
        .become_leader_or_follower(
            BrokerId(0),
            ControllerEpoch(6),
            vec![PartitionDirective {
                topic_partition: tp(0),
                leader: BrokerId(1),
                leader_epoch: LeaderEpoch(1),
                isr: vec![BrokerId(1)],
                replicas: vec![BrokerId(1)],
                is_new: true,
            }],
            &MemoryLogFactory,
            &NoCheckpoints,
            |_, _| {},
        )
        .unwrap_err();

    assert!(matches!(err, ReplicaManagerError::StaleControllerEpoch { .. }));
    assert!(manager.describe_log_dirs().is_empty());
}

#[test]
fn scenario_6_disk_failure_marks_partition_offline() {
    let clock = Arc::new(ManualClock::new(0));
    let manager = manager_with_clock(clock, ReplicaManagerConfig::default());
    become_leader(&manager, tp(0), vec![BrokerId(1)], vec![BrokerId(1)], 1);

    manager.hosted().insert(tp(0), replicamgr::Hosted::Offline);

    let err = manager
        .fetch_one_partition(&tp(0), -1, 0, None, 1024, Isolation::HighWatermark, false)
        .unwrap_err();
    assert!(matches!(err, ReplicaManagerError::KafkaStorageError { .. }));
}

#[test]
fn produce_rejects_invalid_required_acks() {
    let clock = Arc::new(ManualClock::new(0));
    let manager = manager_with_clock(clock, ReplicaManagerConfig::default());
    let err = manager
        .append_records(0, 2, false, HashMap::new(), |_| {})
        .unwrap_err();
    assert!(matches!(err, ReplicaManagerError::InvalidRequiredAcks { .. }));
}

#[test]
fn delete_records_completes_once_low_watermark_reached() {
    let clock = Arc::new(ManualClock::new(0));
    let manager = manager_with_clock(clock, ReplicaManagerConfig::default());
    become_leader(&manager, tp(0), vec![BrokerId(1)], vec![BrokerId(1)], 1);

    let mut entries = HashMap::new();
    entries.insert(
        tp(0),
        (0..5).map(|i| LogRecord::new(None, vec![i as u8])).collect(),
    );
    manager.append_records(0, 1, false, entries, |_| {}).unwrap();
    manager
        .fetch_one_partition(&tp(0), 1, 5, None, 1024, Isolation::LogEnd, false)
        .unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    let c = completed.clone();
    manager.delete_records(60_000, HashMap::from([(tp(0), 3)]), move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[test]
fn elect_leaders_reports_leader_epoch_once_already_leader() {
    let clock = Arc::new(ManualClock::new(0));
    let manager = manager_with_clock(clock, ReplicaManagerConfig::default());
    become_leader(&manager, tp(0), vec![BrokerId(1)], vec![BrokerId(1)], 1);

    let results = Arc::new(std::sync::Mutex::new(None));
    let r = results.clone();
    manager.elect_leaders(ElectionType::Preferred, vec![tp(0)], 5_000, move |out| {
        *r.lock().unwrap() = Some(out);
    });
    let out = results.lock().unwrap().take().unwrap();
    assert_eq!(out.get(&tp(0)).unwrap().as_ref().unwrap(), &LeaderEpoch(1));
}

#[test]
fn alter_replica_log_dirs_copies_and_promotes_future_log() {
    let clock = Arc::new(ManualClock::new(0));
    let manager = manager_with_clock(clock, ReplicaManagerConfig::default());
    become_leader(&manager, tp(0), vec![BrokerId(1)], vec![BrokerId(1)], 1);

    let mut entries = HashMap::new();
    entries.insert(
        tp(0),
        (0..3).map(|i| LogRecord::new(None, vec![i as u8])).collect(),
    );
    manager.append_records(0, 1, false, entries, |_| {}).unwrap();

    let results = manager.alter_replica_log_dirs(
        HashMap::from([(tp(0), "/data/dir-2".to_string())]),
        &MemoryLogFactory,
    );
    assert!(results.get(&tp(0)).unwrap().is_ok());
    assert!(manager.describe_log_dirs().get(&tp(0)).unwrap().has_future_log);

    manager.dir_move_worker_tick();
    manager.promote_caught_up_future_logs();
    assert!(!manager.describe_log_dirs().get(&tp(0)).unwrap().has_future_log);
}
