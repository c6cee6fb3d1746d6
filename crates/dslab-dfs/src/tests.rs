use rstest::rstest;

use dslab_dfs_storage::DeviceSpec;

use crate::engine::DfsEngine;
use crate::error::DfsError;
use crate::metrics::MetricKind;
use crate::replicas::ReplicaTarget;
use crate::task::{TaskKind, TaskSpec, TaskState};
use crate::tiering::{MigrationPlan, MigrationStep};
use crate::topology::NodeId;

///////////////////////////////////////////////////////////////////////////////

fn assert_float_eq(x: f64, y: f64, eps: f64) {
    assert!(
        (x - y).abs() < eps || (x.max(y) - x.min(y)) / x.min(y) < eps,
        "Values do not match: {:.15} vs {:.15}",
        x,
        y
    );
}

fn add_server(engine: &mut DfsEngine, label: &str, capacity: u64, speed: f64) -> (NodeId, usize) {
    let server = engine.add_server(Some(label)).unwrap();
    let device = engine
        .add_device(server, DeviceSpec::new(&format!("{}-disk", label), capacity, speed))
        .unwrap();
    engine.mount(server, "/", device).unwrap();
    (server, device)
}

/// Runs one-second slices until the devices become idle. Returns the time of the last slice end.
fn run_until_idle(engine: &mut DfsEngine, mut time: f64) -> f64 {
    while !engine.pool().is_idle() {
        engine.refresh_limits(time, 1.);
        engine.tick(time, 1.);
        time += 1.;
        assert!(time < 10_000., "simulation does not converge");
    }
    time
}

/// Client `c` which can reach `target` either through `s1` (narrow first hop) or through `s2` (wide first hop).
fn diamond() -> (DfsEngine, NodeId) {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(Some("c")).unwrap();
    let (s1, _) = add_server(&mut engine, "s1", 1000, 100.);
    let (s2, _) = add_server(&mut engine, "s2", 1000, 100.);
    let (target, _) = add_server(&mut engine, "target", 1000, 100.);
    engine.connect(client, s1, 5., 1.).unwrap();
    engine.connect(client, s2, 50., 1.).unwrap();
    engine.connect_both(s1, target, 50., 1.).unwrap();
    engine.connect_both(s2, target, 50., 1.).unwrap();
    engine.create_file(target, "/data/f", 100).unwrap();
    (engine, client)
}

///////////////////////////////////////////////////////////////////////////////

#[rstest]
#[case(MetricKind::HopCount, "s1")]
#[case(MetricKind::WidestBandwidth, "s2")]
#[case(MetricKind::BandwidthLatency, "s2")]
#[case(MetricKind::Throughput, "s2")]
#[case(MetricKind::Hierarchical, "s2")]
fn path_depends_on_metric(#[case] metric: MetricKind, #[case] transit: &str) {
    let (engine, client) = diamond();
    let target = engine.node_by_label("target").unwrap();
    let transit = engine.node_by_label(transit).unwrap();

    let path = engine
        .select_path(client, TaskKind::Download, "/data/f", 0, 0., None, metric)
        .unwrap();
    assert_eq!(path.target, target);
    assert_eq!(path.links, vec![(client, transit), (transit, target)]);
    assert_eq!(path.hops(), 2);
    assert_float_eq(path.latency(engine.topology()), 2., 1e-12);

    let again = engine
        .select_path(client, TaskKind::Download, "/data/f", 0, 0., None, metric)
        .unwrap();
    assert_eq!(path, again);
}

#[test]
fn download_of_missing_object_fails() {
    let (mut engine, client) = diamond();
    let id = engine
        .submit_task(client, TaskSpec::download("/data/missing", MetricKind::Throughput))
        .unwrap();
    assert_eq!(engine.next_task(client), Some(id));
    let err = engine.start_task(id, 3.).unwrap_err();
    assert_eq!(err, DfsError::ObjectNotFound("/data/missing".to_string()));

    let task = engine.task(id).unwrap();
    assert_eq!(task.state, TaskState::Failed(err));
    assert_eq!(task.start_time, Some(3.));
    assert_eq!(task.finish_time, Some(3.));
    assert_eq!(engine.next_task(client), None);
    assert!(engine.all_tasks_settled());
}

#[test]
fn unreachable_holder_is_reported() {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(None).unwrap();
    let (server, _) = add_server(&mut engine, "island", 100, 10.);
    engine.create_file(server, "/f", 10).unwrap();
    let err = engine
        .select_path(client, TaskKind::Download, "/f", 0, 0., None, MetricKind::HopCount)
        .unwrap_err();
    assert!(matches!(err, DfsError::NoPathAvailable { .. }));
}

#[test]
fn upload_requires_mount() {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(None).unwrap();
    let server = engine.add_server(None).unwrap();
    engine.add_device(server, DeviceSpec::new("disk", 100, 10.)).unwrap();
    engine.connect_both(client, server, 10., 0.).unwrap();

    let err = engine
        .select_path(client, TaskKind::Upload, "/f", 10, 0., None, MetricKind::Throughput)
        .unwrap_err();
    assert!(matches!(err, DfsError::NotMounted { .. }));
    assert!(matches!(
        engine.create_file(server, "/f", 10),
        Err(DfsError::NotMounted { .. })
    ));
}

#[test]
fn upload_exceeding_space_fails() {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(None).unwrap();
    let (server, device) = add_server(&mut engine, "small", 100, 10.);
    engine.connect_both(client, server, 10., 0.).unwrap();
    let id = engine
        .submit_task(client, TaskSpec::upload("/big", 150, MetricKind::Throughput))
        .unwrap();
    assert_eq!(
        engine.start_task(id, 0.),
        Err(DfsError::NotEnoughSpaceLeft {
            device,
            requested: 150,
            available: 100,
        })
    );
}

#[test]
fn upload_is_propagated_to_replicas() {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(Some("c")).unwrap();
    let (s1, d1) = add_server(&mut engine, "s1", 1000, 100.);
    let (s2, d2) = add_server(&mut engine, "s2", 1000, 100.);
    engine.connect_both(client, s1, 10., 0.).unwrap();
    engine.connect_both(s1, s2, 10., 0.).unwrap();
    engine.create_file(s1, "/r", 20).unwrap();
    engine.create_file(s2, "/r", 20).unwrap();
    assert!(engine.is_replicated("/r"));

    let spec = TaskSpec::upload("/r", 50, MetricKind::Throughput).with_target(s1);
    let id = engine.submit_task(client, spec).unwrap();
    engine.start_task(id, 0.).unwrap();
    assert_eq!(engine.pool().device(d1).unwrap().reserved_space(), 50);

    let end = run_until_idle(&mut engine, 0.);
    assert_eq!(end, 10.);
    let task = engine.task(id).unwrap();
    assert_eq!(task.state, TaskState::Success);
    assert_float_eq(task.finish_time.unwrap(), 5., 1e-9);
    assert_float_eq(task.throughput().unwrap(), 10., 1e-9);

    for (server, device) in [(s1, d1), (s2, d2)] {
        assert_eq!(engine.file(server, "/r").map(|f| f.size), Some(50));
        let device = engine.pool().device(device).unwrap();
        assert_eq!(device.used_space(), 50);
        assert_eq!(device.reserved_space(), 0);
    }
}

#[test]
fn access_moves_file_to_faster_device() {
    let mut engine = DfsEngine::new();
    let server = engine.add_server(Some("tiered")).unwrap();
    let hdd = engine.add_device(server, DeviceSpec::new("hdd", 1000, 100.)).unwrap();
    let ssd = engine.add_device(server, DeviceSpec::new("ssd", 100, 1000.)).unwrap();
    engine.mount(server, "/", hdd).unwrap();
    engine.set_hierarchical(server, true).unwrap();
    engine.create_file(server, "/f", 50).unwrap();

    let plan = engine.access_file(server, "/f", 0.).unwrap().unwrap();
    assert_eq!(
        plan.steps,
        vec![MigrationStep {
            files: vec!["/f".to_string()],
            size: 50,
            source: hdd,
            target: ssd,
        }]
    );
    // the file is in flight, another access does not plan anything
    assert_eq!(engine.access_file(server, "/f", 0.), Ok(None));

    run_until_idle(&mut engine, 0.);
    assert_eq!(engine.file_device(server, "/f"), Some(ssd));
    assert_eq!(engine.pool().device(hdd).unwrap().used_space(), 0);
    assert_eq!(engine.pool().device(ssd).unwrap().used_space(), 50);
    assert_eq!(engine.replica_targets("/f"), &[ReplicaTarget::new(server, ssd)]);
    let file = engine.file(server, "/f").unwrap();
    assert_eq!(file.access_count, 2);
    assert!(!file.migrating);
}

#[test]
fn removed_device_fails_running_task() {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(Some("c")).unwrap();
    let (server, device) = add_server(&mut engine, "s", 1000, 100.);
    engine.connect_both(client, server, 10., 0.).unwrap();
    engine.create_file(server, "/f", 100).unwrap();
    let id = engine
        .submit_task(client, TaskSpec::download("/f", MetricKind::HopCount))
        .unwrap();
    engine.start_task(id, 0.).unwrap();
    engine.refresh_limits(0., 1.);
    engine.tick(0., 1.);

    engine.remove_device(server, device).unwrap();
    assert!(matches!(engine.task(id).unwrap().state, TaskState::Failed(_)));
    assert!(engine.pool().is_idle());
    assert!(engine.file(server, "/f").is_none());
    assert!(engine.replica_targets("/f").is_empty());
    assert_eq!(engine.active_paths().count(), 0);
}

#[test]
fn replica_operations_keep_replicas_consistent() {
    let mut engine = DfsEngine::new();
    let (s1, d1) = add_server(&mut engine, "s1", 100, 10.);
    let (s2, d2) = add_server(&mut engine, "s2", 100, 10.);
    engine.create_file(s1, "/a/x", 30).unwrap();
    engine.create_file(s2, "/a/x", 30).unwrap();

    assert!(matches!(
        engine.resize_all_replicas("/a/x", 200, false),
        Err(DfsError::NotEnoughSpaceLeft { .. })
    ));
    assert_eq!(engine.file(s1, "/a/x").unwrap().size, 30);

    engine.resize_all_replicas("/a/x", 60, false).unwrap();
    engine.rename_all_replicas("/a/x", "/b/y").unwrap();
    for (server, device) in [(s1, d1), (s2, d2)] {
        assert!(engine.file(server, "/a/x").is_none());
        assert_eq!(engine.file(server, "/b/y").unwrap().size, 60);
        assert_eq!(engine.pool().device(device).unwrap().used_space(), 60);
    }

    assert_eq!(engine.delete_all_replicas("/b/y"), Ok(2));
    assert_eq!(engine.pool().device(d1).unwrap().used_space(), 0);
    assert!(!engine.is_replicated("/b/y"));
    assert_eq!(
        engine.delete_all_replicas("/b/y"),
        Err(DfsError::ObjectNotFound("/b/y".to_string()))
    );
}

#[test]
fn mount_changes_keep_files_and_replicas_consistent() {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(Some("c")).unwrap();
    let (server, d0) = add_server(&mut engine, "s", 100, 10.);
    let d1 = engine.add_device(server, DeviceSpec::new("extra", 100, 10.)).unwrap();
    engine.connect_both(client, server, 10., 0.).unwrap();
    engine.create_file(server, "/data/a", 10).unwrap();

    engine.mount(server, "/data", d1).unwrap();
    assert_eq!(engine.file_device(server, "/data/a"), Some(d0));
    assert_eq!(engine.replica_targets("/data/a"), &[ReplicaTarget::new(server, d0)]);
    engine.create_file(server, "/data/b", 5).unwrap();
    assert_eq!(engine.file_device(server, "/data/b"), Some(d1));

    engine.remove_file(server, "/data/a").unwrap();
    assert_eq!(engine.pool().device(d0).unwrap().used_space(), 0);
    assert!(engine.replica_targets("/data/a").is_empty());
    assert_eq!(
        engine.select_path(client, TaskKind::Download, "/data/a", 0, 0., None, MetricKind::HopCount),
        Err(DfsError::ObjectNotFound("/data/a".to_string()))
    );

    engine.create_file(server, "/c", 7).unwrap();
    engine.unmount(server, "/").unwrap();
    assert_eq!(engine.file_device(server, "/c"), Some(d0));
    let restored = DfsEngine::restore(&engine.export()).unwrap();
    let server = restored.node_by_label("s").unwrap();
    assert_eq!(restored.file_device(server, "/c"), Some(d0));
    assert_eq!(restored.file_device(server, "/data/b"), Some(d1));
    assert_eq!(restored.pool().device(d0).unwrap().used_space(), 7);
}

#[test]
fn rename_keeps_replicas_on_their_devices() {
    let mut engine = DfsEngine::new();
    let (s1, d1) = add_server(&mut engine, "s1", 100, 10.);
    let (s2, d2) = add_server(&mut engine, "s2", 100, 10.);
    let fast = engine.add_device(s1, DeviceSpec::new("fast", 100, 100.)).unwrap();
    engine.mount(s1, "/hot", fast).unwrap();
    engine.create_file(s1, "/x", 30).unwrap();
    engine.create_file(s2, "/x", 30).unwrap();

    engine.rename_all_replicas("/x", "/hot/x").unwrap();
    assert_eq!(engine.file_device(s1, "/hot/x"), Some(d1));
    assert_eq!(engine.file_device(s2, "/hot/x"), Some(d2));
    assert_eq!(
        engine.replica_targets("/hot/x"),
        &[ReplicaTarget::new(s1, d1), ReplicaTarget::new(s2, d2)]
    );
    assert_eq!(engine.pool().device(fast).unwrap().used_space(), 0);
}

#[test]
fn slow_disk_bounds_possible_throughput() {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(Some("c")).unwrap();
    let (server, _) = add_server(&mut engine, "slow", 1000, 4.);
    engine.connect_both(client, server, 10., 0.).unwrap();
    engine.create_file(server, "/f", 100).unwrap();

    let unbound = engine
        .select_path(client, TaskKind::Download, "/f", 0, 0., None, MetricKind::Throughput)
        .unwrap();
    assert_float_eq(unbound.storage_bandwidth(engine.pool()), 4., 1e-12);
    assert_float_eq(engine.possible_throughput(&unbound, 0.), 4., 1e-12);

    let id = engine
        .submit_task(client, TaskSpec::download("/f", MetricKind::Throughput))
        .unwrap();
    engine.start_task(id, 0.).unwrap();
    engine.refresh_limits(0., 1.);
    engine.tick(0., 1.);

    let bound = engine.active_paths().next().unwrap().clone();
    let operation = engine.pool().operation(bound.operation().unwrap()).unwrap();
    assert_float_eq(operation.throughput(), 4., 1e-12);
    assert_float_eq(bound.link_bandwidth(engine.topology(), 1.), 10., 1e-12);
    assert_float_eq(engine.possible_throughput(&bound, 1.), operation.throughput(), 1e-12);

    // a new transfer would share the device with the running one
    assert_float_eq(unbound.storage_bandwidth(engine.pool()), 2., 1e-12);
}

#[test]
fn file_removed_during_migration_is_skipped() {
    let mut engine = DfsEngine::new();
    let server = engine.add_server(Some("tiered")).unwrap();
    let hdd = engine.add_device(server, DeviceSpec::new("hdd", 1000, 10.)).unwrap();
    let ssd = engine.add_device(server, DeviceSpec::new("ssd", 100, 100.)).unwrap();
    engine.mount(server, "/", hdd).unwrap();
    engine.create_file(server, "/x", 10).unwrap();
    engine.create_file(server, "/y", 20).unwrap();

    let plan = MigrationPlan {
        server,
        path: "/y".to_string(),
        steps: vec![MigrationStep {
            files: vec!["/x".to_string(), "/y".to_string()],
            size: 30,
            source: hdd,
            target: ssd,
        }],
    };
    engine.execute_plan(&plan, 0.).unwrap();
    engine.refresh_limits(0., 1.);
    engine.tick(0., 1.);
    engine.remove_file(server, "/x").unwrap();
    run_until_idle(&mut engine, 1.);

    assert!(engine.file(server, "/x").is_none());
    let file = engine.file(server, "/y").unwrap();
    assert!(!file.migrating);
    assert_eq!(engine.file_device(server, "/y"), Some(ssd));
    assert_eq!(engine.replica_targets("/y"), &[ReplicaTarget::new(server, ssd)]);
    let (hdd, ssd) = (engine.pool().device(hdd).unwrap(), engine.pool().device(ssd).unwrap());
    assert_eq!(hdd.used_space(), 0);
    assert_eq!(ssd.used_space(), 20);
    assert_eq!(ssd.reserved_space(), 0);
}
