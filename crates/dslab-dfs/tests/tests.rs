use rstest::rstest;

use dslab_dfs::characteristic::BandwidthCharacteristic;
use dslab_dfs::config::ScenarioConfig;
use dslab_dfs::persist::Element;
use dslab_dfs::replicas::ReplicaTarget;
use dslab_dfs::task::{TaskSpec, TaskState};
use dslab_dfs::tiering::MigrationStep;
use dslab_dfs::{DeviceSpec, DfsEngine, DfsError, MetricKind, NodeId, TimeSliceDriver};

fn assert_float_eq(x: f64, y: f64, eps: f64) {
    assert!(
        (x - y).abs() < eps || (x.max(y) - x.min(y)) / x.min(y) < eps,
        "Values do not match: {:.15} vs {:.15}",
        x,
        y
    );
}

fn init_logger() {
    let _ = env_logger::Builder::from_default_env().is_test(true).try_init();
}

/// Client connected by a 10 MB/s link with 10 ms latency to a server with one 100 MB/s device holding a 1054 MB file.
fn single_link(metric: MetricKind) -> (DfsEngine, NodeId, NodeId, usize) {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(Some("client")).unwrap();
    let server = engine.add_server(Some("server")).unwrap();
    let device = engine
        .add_device(server, DeviceSpec::new("disk", 10_000, 100.))
        .unwrap();
    engine.mount(server, "/", device).unwrap();
    engine.create_file(server, "/data/file", 1054).unwrap();
    engine.connect_both(client, server, 10., 10.).unwrap();
    let task = engine
        .submit_task(client, TaskSpec::download("/data/file", metric))
        .unwrap();
    (engine, client, server, task)
}

///////////////////////////////////////////////////////////////////////////////

#[test]
fn characteristic_average() {
    let characteristic = BandwidthCharacteristic::from_points(60_000., 60., &[(0., 0.5), (0.2, 0.2)]);
    assert_float_eq(characteristic.modifier_at(0.), 0.5, 1e-12);
    assert_float_eq(characteristic.average_modifier(0., 12_000.), 0.35, 1e-9);
    assert_float_eq(characteristic.average_modifier(60_000., 12_000.), 0.35, 1e-9);
    assert_float_eq(characteristic.average_modifier(6_000., 0.), 0.35, 1e-12);
}

#[rstest]
#[case(MetricKind::HopCount)]
#[case(MetricKind::WidestBandwidth)]
#[case(MetricKind::BandwidthLatency)]
#[case(MetricKind::Throughput)]
#[case(MetricKind::Hierarchical)]
fn download_over_single_link(#[case] metric: MetricKind) {
    init_logger();
    let (mut engine, _, server, task) = single_link(metric);
    let end = TimeSliceDriver::new(1., f64::INFINITY).run(&mut engine);

    let task = engine.task(task).unwrap();
    assert_eq!(task.state, TaskState::Success);
    assert_eq!(task.server, Some(server));
    assert_eq!(task.size, 1054);
    assert_float_eq(task.duration().unwrap(), 105.41, 1e-9);
    assert_float_eq(end, 106., 1e-12);
    assert!(engine.pool().is_idle());
}

#[test]
fn download_with_halved_bandwidth() {
    let (mut engine, client, server, task) = single_link(MetricKind::Throughput);
    engine
        .set_characteristic((client, server), BandwidthCharacteristic::constant(0.5))
        .unwrap();
    TimeSliceDriver::default().run(&mut engine);

    let task = engine.task(task).unwrap();
    assert_eq!(task.state, TaskState::Success);
    assert_float_eq(task.duration().unwrap(), 210.81, 1e-9);
}

#[test]
fn horizon_interrupts_download() {
    let (mut engine, _, _, task) = single_link(MetricKind::Throughput);
    let end = TimeSliceDriver::new(1., 50.).run(&mut engine);
    assert_float_eq(end, 50., 1e-12);

    let task = engine.task(task).unwrap();
    match &task.state {
        TaskState::Failed(DfsError::Interrupted { transferred, total }) => {
            assert_float_eq(*transferred, 500., 1e-9);
            assert_eq!(*total, 1054);
        }
        state => panic!("unexpected task state {:?}", state),
    }
    assert_float_eq(task.finish_time.unwrap(), 50.01, 1e-9);
    assert!(engine.pool().is_idle());
}

#[test]
fn tasks_of_client_run_in_order() {
    let (mut engine, client, server, first) = single_link(MetricKind::Throughput);
    let second = engine
        .submit_task(client, TaskSpec::upload("/data/new", 100, MetricKind::Throughput))
        .unwrap();
    let failed = engine
        .submit_task(client, TaskSpec::download("/data/nothing", MetricKind::Throughput))
        .unwrap();
    TimeSliceDriver::default().run(&mut engine);

    let first = engine.task(first).unwrap();
    let second = engine.task(second).unwrap();
    assert_eq!(second.state, TaskState::Success);
    assert!(second.start_time.unwrap() >= first.finish_time.unwrap() - 1.);
    assert_float_eq(second.duration().unwrap(), 10.01, 1e-9);
    assert_eq!(engine.file(server, "/data/new").map(|f| f.size), Some(100));
    assert_eq!(
        engine.task(failed).unwrap().state,
        TaskState::Failed(DfsError::ObjectNotFound("/data/nothing".to_string()))
    );
    assert!(engine.all_tasks_settled());
}

///////////////////////////////////////////////////////////////////////////////

fn tiered_server(engine: &mut DfsEngine) -> (NodeId, usize, usize) {
    let server = engine.add_server(Some("tiered")).unwrap();
    let hdd = engine.add_device(server, DeviceSpec::new("hdd", 1000, 100.)).unwrap();
    let ssd = engine.add_device(server, DeviceSpec::new("ssd", 100, 1000.)).unwrap();
    engine.mount(server, "/", hdd).unwrap();
    engine.set_hierarchical(server, true).unwrap();
    (server, hdd, ssd)
}

#[test]
fn download_promotes_file_to_empty_fast_tier() {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(None).unwrap();
    let (server, hdd, ssd) = tiered_server(&mut engine);
    engine.create_file(server, "/f", 50).unwrap();
    engine.connect_both(client, server, 100., 0.).unwrap();
    engine
        .submit_task(client, TaskSpec::download("/f", MetricKind::Hierarchical))
        .unwrap();
    TimeSliceDriver::default().run(&mut engine);

    assert!(engine.all_tasks_settled());
    assert_eq!(engine.file_device(server, "/f"), Some(ssd));
    assert_eq!(engine.file(server, "/f").unwrap().access_count, 1);
    assert_eq!(engine.pool().device(hdd).unwrap().used_space(), 0);
    assert_eq!(engine.pool().device(ssd).unwrap().used_space(), 50);
}

#[test]
fn full_fast_tier_evicts_coldest_file() {
    let mut engine = DfsEngine::new();
    let (server, hdd, ssd) = tiered_server(&mut engine);
    engine.create_file(server, "/f", 50).unwrap();
    engine
        .create_file_on(ReplicaTarget::new(server, ssd), "/cold", 80, false)
        .unwrap();

    let plan = engine.access_file(server, "/f", 0.).unwrap().unwrap();
    assert_eq!(
        plan.steps,
        vec![
            MigrationStep {
                files: vec!["/cold".to_string()],
                size: 80,
                source: ssd,
                target: hdd,
            },
            MigrationStep {
                files: vec!["/f".to_string()],
                size: 50,
                source: hdd,
                target: ssd,
            },
        ]
    );
    assert_eq!(plan.destination(), Some(ssd));

    TimeSliceDriver::default().run(&mut engine);
    assert_eq!(engine.file_device(server, "/f"), Some(ssd));
    assert_eq!(engine.file_device(server, "/cold"), Some(hdd));
    let hdd = engine.pool().device(hdd).unwrap();
    let ssd = engine.pool().device(ssd).unwrap();
    assert_eq!((hdd.used_space(), hdd.reserved_space()), (80, 0));
    assert_eq!((ssd.used_space(), ssd.reserved_space()), (50, 0));
}

///////////////////////////////////////////////////////////////////////////////

#[test]
fn replacing_replicas_touches_only_changed_members() {
    let mut engine = DfsEngine::new();
    let mut targets = Vec::new();
    for (label, capacity) in [("s1", 100), ("s2", 100), ("s3", 100), ("tiny", 10)] {
        let server = engine.add_server(Some(label)).unwrap();
        let device = engine.add_device(server, DeviceSpec::new("disk", capacity, 10.)).unwrap();
        engine.mount(server, "/", device).unwrap();
        targets.push(ReplicaTarget::new(server, device));
    }
    let (s1, s2, s3, tiny) = (targets[0], targets[1], targets[2], targets[3]);
    engine.create_file(s1.server, "/r", 40).unwrap();
    engine.create_file(s2.server, "/r", 40).unwrap();
    engine.access_file(s2.server, "/r", 0.).unwrap();

    engine.replace_replica_targets("/r", &[s2, s3], false).unwrap();
    assert_eq!(engine.replica_targets("/r"), &[s2, s3]);
    assert!(engine.file(s1.server, "/r").is_none());
    assert_eq!(engine.pool().device(s1.device).unwrap().used_space(), 0);
    // the shared replica is kept as is
    assert_eq!(engine.file(s2.server, "/r").unwrap().access_count, 1);
    assert_eq!(engine.file(s3.server, "/r").unwrap().size, 40);
    assert_eq!(engine.file(s3.server, "/r").unwrap().access_count, 0);

    assert_eq!(
        engine.replace_replica_targets("/r", &[s2, tiny], false),
        Err(DfsError::NotEnoughSpaceLeft {
            device: tiny.device,
            requested: 40,
            available: 10,
        })
    );
    assert_eq!(engine.replica_targets("/r"), &[s2, s3]);

    engine.replace_replica_targets("/r", &[s2, tiny], true).unwrap();
    assert_eq!(engine.replica_targets("/r"), &[s2, tiny]);
    assert_eq!(engine.pool().device(tiny.device).unwrap().used_space(), 40);
    assert_eq!(engine.pool().device(tiny.device).unwrap().available_space(), 0);
}

///////////////////////////////////////////////////////////////////////////////

fn populated_engine() -> DfsEngine {
    let mut engine = DfsEngine::new();
    let client = engine.add_client(Some("laptop")).unwrap();
    let (server, _, ssd) = tiered_server(&mut engine);
    let mirror = engine.add_server(None).unwrap();
    let disk = engine.add_device(mirror, DeviceSpec::new("disk", 500, 50.)).unwrap();
    engine.mount(mirror, "/", disk).unwrap();
    engine.mount(server, "/hot", ssd).unwrap();

    engine.create_file(server, "/docs/a", 10).unwrap();
    engine.create_file(server, "/hot/b", 20).unwrap();
    engine.create_file(mirror, "/docs/a", 10).unwrap();
    engine.access_file(mirror, "/docs/a", 0.).unwrap();

    engine.connect(client, server, 10., 5.).unwrap();
    engine.connect_both(server, mirror, 100., 1.).unwrap();
    engine
        .set_characteristic(
            (client, server),
            BandwidthCharacteristic::from_points(30_000., 30., &[(0., 1.), (0.5, 0.25)]),
        )
        .unwrap();

    let spec = TaskSpec::upload("/docs/c", 5, MetricKind::HopCount)
        .with_target(mirror)
        .not_before(2.);
    engine.submit_task(client, spec).unwrap();
    engine
        .submit_task(client, TaskSpec::download("/docs/a", MetricKind::Throughput))
        .unwrap();
    engine
}

#[test]
fn export_and_restore_round_trip() {
    let engine = populated_engine();
    let exported = engine.export();
    let restored = DfsEngine::restore(&exported).unwrap();
    assert_eq!(restored.export(), exported);

    let mirror = restored.node_by_label("server1").unwrap();
    assert_eq!(restored.file(mirror, "/docs/a").unwrap().access_count, 1);
    assert!(restored.is_replicated("/docs/a"));
    let server = restored.node_by_label("tiered").unwrap();
    assert!(restored.topology().server(server).unwrap().hierarchical);
    assert_eq!(restored.tasks().count(), 2);

    let parsed = Element::from_json(&exported.to_json().unwrap()).unwrap();
    assert_eq!(parsed, exported);
    let parsed = Element::from_yaml(&exported.to_yaml().unwrap()).unwrap();
    assert_eq!(DfsEngine::restore(&parsed).unwrap().export(), exported);
}

#[test]
fn restore_rejects_broken_tree() {
    let mut tree = populated_engine().export();
    tree.children.push(Element::new("router"));
    assert!(matches!(DfsEngine::restore(&tree), Err(DfsError::InvalidElement(_))));

    let tree = Element::new("dfs").child(Element::new("server"));
    assert!(matches!(DfsEngine::restore(&tree), Err(DfsError::InvalidElement(_))));
}

///////////////////////////////////////////////////////////////////////////////

#[test]
fn yaml_scenario_runs() {
    let yaml = r#"
step: 1
metric: throughput
servers:
  - label: server
    devices:
      - { name: disk, capacity: 10000, speed: 100 }
    mounts:
      - { path: /, device: disk }
    files:
      - { path: /data/file, size: 1054 }
clients:
  - label: client
    tasks:
      - { kind: download, path: /data/file }
connections:
  - { from: client, to: server, bandwidth: 10, latency: 10 }
"#;
    let (mut engine, driver) = ScenarioConfig::from_yaml(yaml).unwrap().build().unwrap();
    driver.run(&mut engine);
    let task = engine.tasks().next().unwrap();
    assert_eq!(task.state, TaskState::Success);
    assert_float_eq(task.duration().unwrap(), 105.41, 1e-9);
}

#[rstest]
#[case("single_link.yaml")]
#[case("tiering.yaml")]
#[case("replication.yaml")]
fn demo_scenarios_complete(#[case] name: &str) {
    let path = format!("{}/../../demos/dfs-transfer/scenarios/{}", env!("CARGO_MANIFEST_DIR"), name);
    let (mut engine, driver) = ScenarioConfig::from_file(path).unwrap().build().unwrap();
    driver.run(&mut engine);
    assert!(engine.all_tasks_settled());
    assert!(engine.tasks().all(|t| t.state == TaskState::Success));
}
