use std::path::PathBuf;

use arterial::agent::{agent_id, AgentSeed, Trip};
use arterial::network::RoadNetwork;
use arterial::parameters::{NetworkFormat, Parameters};
use arterial::simulation::Simulation;
use arterial::units::{Length, Speed, Time};

fn get_parameters(output_directory: PathBuf) -> Parameters {
    Parameters {
        time_tolerance: Time(0.5),
        proc_x: 1,
        proc_y: 1,
        network_format: NetworkFormat::Transims,
        correct_start_time: false,
        prop_strategic_agents: 0.0,
        record_interval_aggregate: 15,
        record_interval_snapshot: 5,
        input_files: Default::default(),
        output_directory,
        random_seed: Some(1),
    }
}

/// One link of 100 m at 10 m/s (10 s free flow) with a capacity of 10.
fn get_network() -> RoadNetwork {
    let mut network = RoadNetwork::new();
    network.add_node("a", 0.0, 0.0).unwrap();
    network.add_node("b", 100.0, 0.0).unwrap();
    network
        .add_link("a-b", "a", "b", Length(100.0), Speed(10.0), 10.0)
        .unwrap();
    network
}

#[test]
fn identity_trip_test() {
    let dir = tempfile::tempdir().unwrap();
    let network = get_network();
    let a = network.node_index("a").unwrap();
    let b = network.node_index("b").unwrap();
    let population = vec![AgentSeed {
        id: agent_id(1),
        trips: vec![Trip::new(a, b, Time(0.0))],
    }];
    let simulation = Simulation::new(
        network,
        population,
        Vec::new(),
        get_parameters(dir.path().to_path_buf()),
    );
    let outcome = simulation.run().unwrap();

    // The agent departs at tick 1 and needs 10 s on the (empty) link, so it
    // arrives at tick 11 with a realised duration equal to the free-flow
    // duration.
    assert_eq!(outcome.total_trips_performed(), 1);
    assert_eq!(outcome.total_reroutings(), 0);
    assert_eq!(outcome.remaining_agents(), 0);
    let fitness = outcome.fitness_of(agent_id(1)).unwrap();
    assert!((fitness - 1.0).abs() < 1e-3, "fitness {fitness} != 1.0");

    // The termination check runs every 100 ticks.
    assert_eq!(outcome.ticks(), 100);

    // One move record: agent 1 entering the link at time 1.
    let moves = std::fs::read_to_string(dir.path().join("moves_proc_0.csv")).unwrap();
    let lines: Vec<&str> = moves.lines().collect();
    assert_eq!(lines.len(), 2);
    let fields: Vec<&str> = lines[1].split(';').collect();
    assert_eq!(fields[0], "1");
    assert_eq!(fields[1], "a-b");
    assert_eq!(fields[2], "1");
    assert_eq!(fields[4], "1");
    assert_eq!(fields[5], "1");

    // The starting time was recorded and sorted out to rank 0.
    let starting = std::fs::read_to_string(dir.path().join("starting_times.csv")).unwrap();
    assert_eq!(starting.lines().nth(1), Some("1"));
}

#[test]
fn congestion_test() {
    let dir = tempfile::tempdir().unwrap();
    let network = get_network();
    let a = network.node_index("a").unwrap();
    let b = network.node_index("b").unwrap();
    // Ten agents all entering the link at tick 1.
    let population = (1..=10)
        .map(|i| AgentSeed {
            id: agent_id(i),
            trips: vec![Trip::new(a, b, Time(0.0))],
        })
        .collect();
    let simulation = Simulation::new(
        network,
        population,
        Vec::new(),
        get_parameters(dir.path().to_path_buf()),
    );
    let outcome = simulation.run().unwrap();
    assert_eq!(outcome.total_trips_performed(), 10);
    assert_eq!(outcome.remaining_agents(), 0);

    // The agents enter in id order; the n-th entrant sees n agents on the
    // link, so its travel time is 10 * (1 + 0.15 * (n / 10)^4). The tenth
    // entrant saturates the link: 10 * (1 + 0.15) = 11.5 s.
    let moves = std::fs::read_to_string(dir.path().join("moves_proc_0.csv")).unwrap();
    let times: Vec<f64> = moves
        .lines()
        .skip(1)
        .map(|line| line.split(';').nth(3).unwrap().parse().unwrap())
        .collect();
    assert_eq!(times.len(), 10);
    for (i, &time) in times.iter().enumerate() {
        let n = (i + 1) as f64;
        let expected = 10.0 * (1.0 + 0.15 * (n / 10.0).powi(4));
        assert!(
            (time - expected).abs() < 1e-6,
            "entrant {}: time on link {time} != {expected}",
            i + 1
        );
    }
    assert!((times[9] - 11.5).abs() < 1e-9);

    // sim_out.csv sums the counters at every tick: at tick 1 the ten agents
    // are all moving.
    let sim_out = std::fs::read_to_string(dir.path().join("sim_out.csv")).unwrap();
    let first_tick: Vec<&str> = sim_out.lines().nth(1).unwrap().split(';').collect();
    assert_eq!(first_tick, vec!["1", "10", "10", "0", "0"]);
}
