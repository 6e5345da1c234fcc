use super::helpers::{run_chain, world};
use chainagg::{AggregatorConfig, ChainAggregator, ChainError, GrowableBuffer};
use futures::future::join_all;

#[tokio::test]
async fn test_two_chains_layout() {
    let results = run_chain(8, 2, |agg| async move {
        (
            agg.rank(),
            agg.size(),
            agg.sub_streams(),
            agg.sub_stream_index(),
            agg.consumer_rank(),
            agg.is_consumer(),
            agg.is_active(),
        )
    })
    .await;

    for (parent, r) in results.into_iter().enumerate() {
        let parent = parent as u32;
        let (rank, size, subs, index, consumer, is_consumer, active) = r;
        assert_eq!(size, 4);
        assert_eq!(subs, 2);
        assert_eq!(rank, parent % 4);
        assert_eq!(index, (parent / 4) as usize);
        assert_eq!(consumer, (parent / 4) * 4);
        assert_eq!(is_consumer, rank == 0);
        assert!(active);
    }
}

#[tokio::test]
async fn test_chains_aggregate_independently() {
    let results = run_chain(6, 3, |mut agg| async move {
        let parent = agg.consumer_rank() + agg.rank();
        let mut buffer = GrowableBuffer::from_bytes(&[parent as u8]);
        let offset = agg.exchange_absolute_positions(&mut buffer).await.unwrap();
        let mut seen = Vec::new();
        agg.aggregate(&mut buffer, |b| {
            seen.extend_from_slice(b.as_slice());
            Ok(())
        })
        .await
        .unwrap();
        (offset, seen, agg.stream_end())
    })
    .await;

    // Chains {0,1}, {2,3}, {4,5}: each sink sees only its own chain.
    for sink in [0usize, 2, 4] {
        let (offset, seen, end) = &results[sink];
        assert_eq!(*offset, 0);
        assert_eq!(seen, &vec![sink as u8, sink as u8 + 1]);
        assert_eq!(*end, Some(2));
        assert_eq!(results[sink + 1].0, 1);
        assert!(results[sink + 1].1.is_empty());
    }
}

#[tokio::test]
async fn test_invalid_sub_stream_counts() {
    let comms = world(4);
    for (subs, uneven) in [(0usize, false), (5, false), (3, true)] {
        let config = AggregatorConfig::with_sub_streams(subs);
        let results = join_all(comms.iter().map(|c| ChainAggregator::init(c, &config))).await;
        for r in results {
            match r {
                Err(ChainError::UnevenChains { .. }) => assert!(uneven),
                Err(ChainError::InvalidSubStreams { .. }) => assert!(!uneven),
                other => panic!("sub_streams {subs}: unexpected {other:?}"),
            }
        }
    }
}

#[tokio::test]
async fn test_second_aggregator_on_same_parent() {
    let comms = world(4);
    let config = AggregatorConfig::with_sub_streams(2);
    let first: Vec<_> = join_all(comms.iter().map(|c| ChainAggregator::init(c, &config)))
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let config = AggregatorConfig::with_sub_streams(1);
    let second: Vec<_> = join_all(comms.iter().map(|c| ChainAggregator::init(c, &config)))
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(first[3].size(), 2);
    assert_eq!(second[3].size(), 4);
    assert_ne!(first[0].comm().comm_id(), second[0].comm().comm_id());
}

#[tokio::test]
async fn test_closed_aggregator_rejects_calls() {
    let results = run_chain(2, 1, |mut agg| async move {
        agg.close();
        assert!(!agg.is_active());
        let mut buffer = GrowableBuffer::from_bytes(b"x");
        let exchange = agg.iexchange(&mut buffer, 0).await.map(|_| ());
        let offsets = agg.iexchange_absolute_position(&buffer, 0).map(|_| ());
        let links = agg.handshake_links().await;
        (exchange, offsets, links)
    })
    .await;

    for (exchange, offsets, links) in results {
        assert!(matches!(exchange, Err(ChainError::Inactive)));
        assert!(matches!(offsets, Err(ChainError::Inactive)));
        assert!(matches!(links, Err(ChainError::Inactive)));
    }
}

#[tokio::test]
async fn test_sink_handshake_can_be_repeated() {
    let results = run_chain(3, 1, |mut agg| async move {
        agg.handshake_rank(0).await.unwrap();
        agg.handshake_links().await.unwrap();
        agg.sink_rank()
    })
    .await;
    assert_eq!(results, vec![0, 0, 0]);
}

#[tokio::test]
async fn test_sink_handshake_rejects_rank_outside_chain() {
    let results = run_chain(2, 1, |mut agg| async move { agg.handshake_rank(2).await })
        .await;
    for r in results {
        assert!(matches!(r, Err(ChainError::InvalidRank { rank: 2, size: 2 })));
    }
}

#[tokio::test]
async fn test_non_zero_sink_rejected_and_rank_zero_keeps_consuming() {
    let results = run_chain(3, 1, |mut agg| async move {
        let handshake = agg.handshake_rank(1).await;
        assert!(matches!(
            handshake,
            Err(ChainError::HandshakeMismatch {
                expected: 0,
                actual: 1
            })
        ));

        let payload = [b"a", b"b", b"c"][agg.rank() as usize];
        let mut buffer = GrowableBuffer::from_bytes(payload);
        let mut seen = Vec::new();
        agg.aggregate(&mut buffer, |b| {
            seen.push(b.as_slice().to_vec());
            Ok(())
        })
        .await
        .unwrap();
        (agg.is_consumer(), seen)
    })
    .await;

    assert_eq!(
        results[0],
        (true, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
    );
    for (consumer, seen) in &results[1..] {
        assert!(!consumer);
        assert!(seen.is_empty());
    }
}
