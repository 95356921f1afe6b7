use std::collections::HashSet;
use std::io::Write;
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use ibr_shape::cluster::{ClusterMethod, ClusterRequest, Linkage};
use ibr_shape::error::AnalysisError;
use ibr_shape::features::{DataStringCosineSimilarity, DataStringEntropy, DataStringNewInformation};
use ibr_shape::running::feature_set_for;
use ibr_shape::*;

const DST: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 1);

fn udp_options(memory_n: usize) -> IngestOptions {
    IngestOptions {
        protocol: Protocol::Udp,
        destinations: HashSet::from([DST]),
        window: WindowConfig {
            memory_n,
            interpolation_n: 100,
            ngram_size: 1,
        },
        split_by_port: false,
        max_sources: NonZeroUsize::new(64).unwrap(),
    }
}

fn udp(src: Ipv4Addr, dst_port: u32, ip_len: u32, timestamp: f64) -> PacketRecord {
    PacketRecord {
        src_addr: src,
        dst_addr: DST,
        protocol: Protocol::Udp,
        dst_port,
        ip_len,
        timestamp,
        tcp_flags: 0,
    }
}

/// One record line in the upstream column layout.
fn record_line(src: Ipv4Addr, dst_port: u32, ip_len: u32, timestamp: f64) -> String {
    format!(
        "{},{},17,40000,{},0,{},1,64,2020-02-12 18:01:01,{},-1,0,0",
        u32::from(src),
        u32::from(DST),
        dst_port,
        ip_len,
        timestamp
    )
}

fn summary_row(source: &str, time: f64, level: f64) -> SummaryRow {
    SummaryRow {
        source: source.to_string(),
        time,
        values: [level, level * 0.5, level * 0.25, 0.0, 0.0],
        deltas: [level * 0.1, 0.0, 0.0, 0.0, 0.0],
    }
}

/// Six sources in three well-separated behavioral groups. The wobble grows
/// with the level so trajectory shapes differ between groups too.
fn three_groups() -> SummaryTable {
    let mut table = SummaryTable::new();
    for t in 0..30 {
        let wobble = (t % 3) as f64 * 0.02;
        for (source, level) in [
            ("10.0.0.1", 1.0),
            ("10.0.0.2", 1.05),
            ("10.0.1.1", 5.0),
            ("10.0.1.2", 5.1),
            ("10.0.2.1", 12.0),
            ("10.0.2.2", 12.2),
        ] {
            table.push(summary_row(source, t as f64, level * (1.0 + wobble)));
        }
    }
    table
}

#[test]
fn test_first_summary_row_after_window_plus_two() {
    let mut analysis = TrafficShapeAnalysis::new(udp_options(100)).unwrap();
    let src = Ipv4Addr::new(203, 0, 113, 7);

    for i in 0..150u32 {
        let port = if i % 2 == 0 { 53 } else { 123 };
        analysis
            .ingest_record(&udp(src, port, 60, i as f64))
            .unwrap();
        if i + 1 == 102 {
            assert!(analysis.summary().is_empty());
        }
        if i + 1 == 103 {
            assert_eq!(analysis.summary().len(), 1);
        }
    }

    assert_eq!(analysis.summary().len(), 150 - 102);
    for row in analysis.summary().rows() {
        assert_eq!(row.source, "203.0.113.7");
        assert!(row.values.iter().all(|v| *v >= 0.0 && v.is_finite()));
        assert!(row.values.windows(2).all(|w| w[0] >= w[1]));
    }
}

#[test]
fn test_constant_and_random_sources_are_apart() {
    let mut analysis = TrafficShapeAnalysis::new(udp_options(50)).unwrap();
    let steady = Ipv4Addr::new(203, 0, 113, 1);
    let noisy = Ipv4Addr::new(203, 0, 113, 2);
    let mut rng = ChaCha8Rng::seed_from_u64(11);

    for i in 0..120u32 {
        let t = i as f64;
        analysis.ingest_record(&udp(steady, 5060, 60, t)).unwrap();
        let port = rng.gen_range(1..1024);
        let len = rng.gen_range(28..200);
        analysis
            .ingest_record(&udp(noisy, port, len, t + rng.gen_range(0.0..0.9)))
            .unwrap();
    }

    let constant = analysis.source("203.0.113.1").unwrap();
    let states = constant.last_states();
    for (descriptor, history) in constant.descriptors().into_iter().zip(&states) {
        assert_eq!(history.len(), 50, "{descriptor}");
        if descriptor == DataStringNewInformation::DESCRIPTOR {
            assert!(history.iter().all(|s| s.abs() < 1e-12));
        }
        if descriptor == DataStringEntropy::DESCRIPTOR {
            assert!(history.iter().all(|s| *s == history[0]));
        }
    }

    let matrix = analysis
        .gen_dissimilarity_matrix(&DistanceOptions::default())
        .unwrap();
    assert_eq!(matrix.len(), 2);
    assert!(matrix.get(0, 1) > 0.0);
    assert_eq!(matrix.get(0, 1), matrix.get(1, 0));
    assert_eq!(matrix.get(0, 0), 0.0);
}

#[test]
fn test_constant_icmp_source_states() {
    let window = WindowConfig {
        memory_n: 20,
        interpolation_n: 20,
        ngram_size: 1,
    };
    let mut running =
        RunningFeatures::for_feature_set(feature_set_for(Protocol::Icmp).unwrap(), window);
    for i in 0..30u32 {
        let echo = PacketRecord {
            protocol: Protocol::Icmp,
            dst_port: 8,
            ip_len: 84,
            ..udp(Ipv4Addr::new(203, 0, 113, 9), 0, 0, i as f64)
        };
        running.update(&echo).unwrap();
    }

    let descriptors = running.descriptors();
    let states = running.last_states();
    let position = |name: &str| descriptors.iter().position(|d| *d == name).unwrap();

    let cosine = &states[position(DataStringCosineSimilarity::DESCRIPTOR)];
    assert_eq!(cosine.len(), 20);
    assert!(cosine.iter().all(|s| (s - 1.0).abs() < 1e-9));
    let new_info = &states[position(DataStringNewInformation::DESCRIPTOR)];
    assert!(new_info.iter().all(|s| s.abs() < 1e-12));
    assert!(running.summary().is_some());
}

#[test]
fn test_ingest_files_then_round_trip_summary() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("day1.csv");
    let mut file = std::fs::File::create(&input).unwrap();
    for i in 0..80u32 {
        let src = Ipv4Addr::new(192, 0, 2, (i % 2) as u8 + 1);
        writeln!(file, "{}", record_line(src, 53 + i % 3, 60 + i % 5, i as f64)).unwrap();
    }
    drop(file);

    let mut analysis = TrafficShapeAnalysis::new(udp_options(20)).unwrap();
    let stats = analysis.ingest_files(&[input]).unwrap();
    assert_eq!(stats.records_read, 80);
    assert_eq!(stats.packets_accepted, 80);
    assert_eq!(stats.sources_created, 2);
    assert_eq!(stats.summary_rows, 2 * (40 - 22));

    let saved = dir.path().join("summary.csv");
    analysis.summary().save(&saved).unwrap();
    let loaded = SummaryTable::load(&saved).unwrap();
    assert_eq!(loaded.len(), analysis.summary().len());
    assert_eq!(loaded.sources(), analysis.summary().sources());
}

#[test]
fn test_fixed_k_gives_exactly_k_clusters() {
    for request in [
        ClusterRequest::agglomerative(Linkage::Average).with_n_clusters(3),
        ClusterRequest::agglomerative(Linkage::Complete).with_n_clusters(3),
        ClusterRequest::spectral(3).with_seed(5),
    ] {
        let mut analysis = TrafficShapeAnalysis::from_summary(three_groups());
        let outcome = analysis
            .cluster(&request, &DistanceOptions::default())
            .unwrap();
        assert_eq!(outcome.n_clusters(), 3, "{}", request.method);
        assert_eq!(outcome.labels.len(), 6);
        assert_eq!(outcome.labels[0], outcome.labels[1]);
        assert_eq!(outcome.labels[2], outcome.labels[3]);
        assert_eq!(outcome.labels[4], outcome.labels[5]);
    }
}

#[test]
fn test_mean_shift_with_quantile() {
    let mut analysis = TrafficShapeAnalysis::from_summary(three_groups());
    let request = ClusterRequest::mean_shift().with_quantile(0.5);
    let outcome = analysis
        .cluster(&request, &DistanceOptions::default())
        .unwrap();
    assert_eq!(outcome.model.method(), ClusterMethod::MeanShift);
    assert_eq!(outcome.labels.len(), 6);
    assert_eq!(outcome.labels[0], outcome.labels[1]);
}

#[test]
fn test_invalid_requests_rejected() {
    let options = DistanceOptions::default();
    let invalid = [
        ClusterRequest::agglomerative(Linkage::Single),
        ClusterRequest::agglomerative(Linkage::Single)
            .with_n_clusters(2)
            .with_distance_threshold(1.0),
        ClusterRequest::mean_shift(),
        ClusterRequest::mean_shift()
            .with_bandwidth(1.0)
            .with_quantile(0.5),
        ClusterRequest::spectral(7),
    ];
    for request in invalid {
        let mut analysis = TrafficShapeAnalysis::from_summary(three_groups());
        let result = analysis.cluster(&request, &options);
        assert!(
            matches!(result, Err(AnalysisError::InvalidParameters(_))),
            "{:?}",
            request
        );
    }
}

#[test]
fn test_quality_scores_reported() {
    let mut analysis = TrafficShapeAnalysis::from_summary(three_groups());
    let request = ClusterRequest::agglomerative(Linkage::Average).with_n_clusters(3);
    let outcome = analysis
        .cluster(&request, &DistanceOptions::default())
        .unwrap();

    let silhouette = outcome.quality.silhouette.unwrap();
    let davies_bouldin = outcome.quality.davies_bouldin.unwrap();
    assert!(silhouette > 0.5 && silhouette <= 1.0);
    assert!(davies_bouldin >= 0.0 && davies_bouldin < 1.0);
}
