use std::path::PathBuf;

use arterial::agent::{agent_id, AgentSeed, Trip};
use arterial::network::RoadNetwork;
use arterial::parameters::{NetworkFormat, Parameters};
use arterial::simulation::Simulation;
use arterial::units::{Length, Speed, Time};

fn get_parameters(output_directory: PathBuf, n_partitions: usize) -> Parameters {
    Parameters {
        time_tolerance: Time(0.5),
        proc_x: n_partitions,
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

/// Three nodes in a row. With two partitions and the synthetic strip
/// coordinates, the nodes alternate between the ranks in insertion order:
/// `b` and `e` land on rank 0, `c` on rank 1, so the link `b-c` crosses the
/// partition boundary.
fn get_network() -> RoadNetwork {
    let mut network = RoadNetwork::new();
    network.add_node("b", 0.0, 0.0).unwrap();
    network.add_node("c", 100.0, 0.0).unwrap();
    network.add_node("e", 200.0, 0.0).unwrap();
    network
        .add_link("b-c", "b", "c", Length(100.0), Speed(10.0), 10.0)
        .unwrap();
    network
        .add_link("c-e", "c", "e", Length(100.0), Speed(10.0), 10.0)
        .unwrap();
    network
}

#[test]
fn inter_partition_handoff_test() {
    let dir = tempfile::tempdir().unwrap();
    let network = get_network();
    let b = network.node_index("b").unwrap();
    let e = network.node_index("e").unwrap();
    let population = vec![AgentSeed {
        id: agent_id(1),
        trips: vec![Trip::new(b, e, Time(0.0))],
    }];
    let simulation = Simulation::new(
        network,
        population,
        Vec::new(),
        get_parameters(dir.path().to_path_buf(), 2),
    );
    let outcome = simulation.run().unwrap();

    // The agent departs on rank 0 (owner of `b`), reaches `c` around tick
    // 11, is flagged for migration and crosses to rank 1 at the end of that
    // tick. Rank 1 then moves it over `c-e` and books the arrival around
    // tick 22.
    let rank0 = &outcome.partitions[0];
    let rank1 = &outcome.partitions[1];
    assert_eq!(rank0.migrations_out, 1);
    assert_eq!(rank0.migrations_in, 0);
    assert_eq!(rank1.migrations_in, 1);
    assert_eq!(rank1.migrations_out, 0);
    assert_eq!(rank0.trips_performed, 0);
    assert_eq!(rank1.trips_performed, 1);
    assert_eq!(outcome.remaining_agents(), 0);

    // The trip state survived the handoff: the realised duration spans both
    // partitions (depart at tick 1, arrive at tick 22) while the
    // theoretical duration is the 20 s of free flow.
    assert_eq!(rank1.fitness.len(), 1);
    let (id, fitness) = rank1.fitness[0];
    assert_eq!(id, agent_id(1));
    assert!(
        (fitness - 20.0 / 21.0).abs() < 1e-3,
        "fitness {fitness} != 20/21"
    );

    // The move records landed on the rank owning each link.
    let moves0 = std::fs::read_to_string(dir.path().join("moves_proc_0.csv")).unwrap();
    let moves1 = std::fs::read_to_string(dir.path().join("moves_proc_1.csv")).unwrap();
    assert!(moves0.lines().nth(1).unwrap().contains(";b-c;"));
    assert!(moves1.lines().nth(1).unwrap().contains(";c-e;"));
}

#[test]
fn conservation_test() {
    // Agents in + migrated in = agents removed + migrated out + remaining,
    // over a population scattered on three partitions.
    let dir = tempfile::tempdir().unwrap();
    let network = {
        let mut network = RoadNetwork::new();
        for (i, id) in ["n0", "n1", "n2", "n3", "n4", "n5"].iter().enumerate() {
            network.add_node(id, i as f64 * 100.0, 0.0).unwrap();
        }
        for i in 0..5 {
            network
                .add_link(
                    &format!("l{i}"),
                    &format!("n{i}"),
                    &format!("n{}", i + 1),
                    Length(100.0),
                    Speed(10.0),
                    10.0,
                )
                .unwrap();
        }
        network
    };
    let n0 = network.node_index("n0").unwrap();
    let n3 = network.node_index("n3").unwrap();
    let n5 = network.node_index("n5").unwrap();
    let population = vec![
        AgentSeed {
            id: agent_id(1),
            trips: vec![Trip::new(n0, n5, Time(0.0))],
        },
        AgentSeed {
            id: agent_id(2),
            trips: vec![Trip::new(n3, n5, Time(30.0))],
        },
        AgentSeed {
            id: agent_id(3),
            // A chain of two trips with a pause in between.
            trips: vec![Trip::new(n0, n3, Time(0.0)), Trip::new(n3, n5, Time(120.0))],
        },
    ];
    let nb_trips: i64 = population.iter().map(|p| p.trips.len() as i64).sum();
    let simulation = Simulation::new(
        network,
        population,
        Vec::new(),
        get_parameters(dir.path().to_path_buf(), 3),
    );
    let outcome = simulation.run().unwrap();
    assert_eq!(outcome.total_trips_performed(), nb_trips);
    assert_eq!(outcome.remaining_agents(), 0);
    let migrations_in: u64 = outcome.partitions.iter().map(|p| p.migrations_in).sum();
    let migrations_out: u64 = outcome.partitions.iter().map(|p| p.migrations_out).sum();
    assert_eq!(migrations_in, migrations_out);
    assert!(migrations_out > 0, "the walk should cross partitions");
}
