//! Universal invariants, checked over whole arrival sequences.

use std::sync::Arc;

use ember_bloom::{BloomFilter, UpdatePolicy};
use ember_chain::test_utils::{coinbase, next_full_block, next_header_block};
use ember_chain::{
    BlockStore, ChainEngine, FullConnector, MemoryBlockStore, NetworkParameters, NewBlockKind,
    StoredBlock,
};
use ember_types::Block;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::harness::RecordingListener;

fn spv_engine() -> (Arc<ChainEngine>, StoredBlock) {
    let params = NetworkParameters::unit_test();
    let store = Arc::new(MemoryBlockStore::new(&params).unwrap());
    let engine = Arc::new(ChainEngine::new_header_only(params, store).unwrap());
    let genesis = engine.chain_head();
    (engine, genesis)
}

/// A linear header chain of `len` blocks on top of `base`.
fn header_chain(base: &StoredBlock, len: usize, step_offset: u64) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(len);
    let mut tip = base.clone();
    for i in 0..len {
        let block = next_header_block(
            &tip,
            base.header.timestamp + step_offset + 600 * (i as u64 + 1),
        );
        tip = tip.build_next(&block.header).unwrap();
        blocks.push(block);
    }
    blocks
}

#[test]
fn test_property_head_monotonicity() {
    let (engine, genesis) = spv_engine();
    let main = header_chain(&genesis, 5, 0);
    let fork = header_chain(&genesis, 7, 17);

    // An adversarial-ish interleaving with duplicates and orphans.
    let mut submissions = Vec::new();
    submissions.push(main[0].clone());
    submissions.push(fork[2].clone()); // orphan
    submissions.push(main[1].clone());
    submissions.push(fork[0].clone());
    submissions.push(fork[1].clone()); // releases fork[2], triggers re-org
    submissions.push(main[2].clone());
    submissions.push(main[2].clone()); // duplicate
    submissions.extend(main[3..].iter().cloned());
    submissions.extend(fork[3..].iter().cloned());

    let mut best_height = engine.best_height();
    let mut best_work = engine.chain_head().chain_work;
    for block in submissions {
        let _ = engine.add(block).unwrap();
        let head = engine.chain_head();
        assert!(head.height >= best_height, "height went backwards");
        assert!(head.chain_work >= best_work, "work went backwards");
        best_height = head.height;
        best_work = head.chain_work;
    }

    // The seven-block fork must have won in the end.
    assert_eq!(engine.best_height(), 7);
}

#[test]
fn test_property_arrival_order_determinism() {
    let params = NetworkParameters::unit_test();
    let store = Arc::new(MemoryBlockStore::new(&params).unwrap());
    let probe = ChainEngine::new_header_only(params, store).unwrap();
    let genesis = probe.chain_head();

    let main = header_chain(&genesis, 5, 0);
    let fork = header_chain(&genesis, 6, 17);
    let all: Vec<Block> = main.iter().chain(fork.iter()).cloned().collect();

    let natural: Vec<Block> = all.clone();
    let reversed: Vec<Block> = all.iter().rev().cloned().collect();
    let mut shuffled = all.clone();
    let mut rng = StdRng::seed_from_u64(7);
    for i in (1..shuffled.len()).rev() {
        shuffled.swap(i, rng.gen_range(0..=i));
    }
    let mut with_duplicates = all.clone();
    with_duplicates.extend(all.iter().cloned());

    let mut heads = Vec::new();
    for order in [natural, reversed, shuffled, with_duplicates] {
        let params = NetworkParameters::unit_test();
        let store = Arc::new(MemoryBlockStore::new(&params).unwrap());
        let engine = ChainEngine::new_header_only(params, store).unwrap();
        for block in order {
            // Orphans return false; that is fine, replay picks them up.
            let _ = engine.add(block).unwrap();
        }
        heads.push(engine.chain_head().hash());
    }

    assert!(heads.windows(2).all(|pair| pair[0] == pair[1]), "heads diverged: {heads:?}");
}

#[test]
fn test_property_orphan_parent_never_in_store() {
    let (engine, genesis) = spv_engine();
    let chain = header_chain(&genesis, 6, 0);

    // Worst case arrival order: everything is an orphan until the first
    // block lands.
    for block in chain.iter().rev() {
        let _ = engine.add(block.clone()).unwrap();

        for candidate in &chain {
            if engine.is_orphan(&candidate.hash()) {
                let parent = engine.store().get(&candidate.header.prev_hash).unwrap();
                assert!(
                    parent.is_none(),
                    "orphan pool holds a block whose parent is stored"
                );
            }
        }
    }
    assert_eq!(engine.best_height(), 6);
}

#[test]
fn test_property_reorg_symmetry_of_utxo_state() {
    let params = NetworkParameters::unit_test();
    let seed_store = Arc::new(MemoryBlockStore::new(&params).unwrap());
    let genesis = seed_store.get_head().unwrap();

    // Main branch of 2, fork branch of 3, disjoint coinbases.
    let m1 = next_full_block(&genesis, genesis.header.timestamp + 600, vec![coinbase(50, 0xA)]);
    let sm1 = genesis.build_next(&m1.header).unwrap();
    let m2 = next_full_block(&sm1, genesis.header.timestamp + 1200, vec![coinbase(50, 0xB)]);

    let f1 = next_full_block(&genesis, genesis.header.timestamp + 660, vec![coinbase(50, 0xC)]);
    let sf1 = genesis.build_next(&f1.header).unwrap();
    let f2 = next_full_block(&sf1, genesis.header.timestamp + 1260, vec![coinbase(50, 0xD)]);
    let sf2 = sf1.build_next(&f2.header).unwrap();
    let f3 = next_full_block(&sf2, genesis.header.timestamp + 1860, vec![coinbase(50, 0xE)]);

    let orders: Vec<Vec<&Block>> = vec![
        vec![&m1, &m2, &f1, &f2, &f3],       // main first, then overtaken
        vec![&f1, &f2, &f3, &m1, &m2],       // fork first, main arrives late
        vec![&f3, &f2, &f1, &m2, &m1],       // orphan-heavy arrival
        vec![&m1, &f1, &m2, &f2, &f3, &m1],  // interleaved with a duplicate
    ];

    let mut outcomes = Vec::new();
    for order in orders {
        let params = NetworkParameters::unit_test();
        let store = Arc::new(MemoryBlockStore::new(&params).unwrap());
        let connector = Arc::new(FullConnector::new(store.clone()));
        let engine = ChainEngine::new(params, store, connector.clone()).unwrap();

        for block in order {
            let _ = engine.add(block.clone()).unwrap();
        }
        outcomes.push((engine.chain_head().hash(), connector.utxo_snapshot()));
    }

    let (expected_head, expected_utxo) = &outcomes[0];
    assert_eq!(*expected_head, f3.hash());
    for (head, utxo) in &outcomes {
        assert_eq!(head, expected_head);
        assert_eq!(utxo, expected_utxo, "UTXO state depended on arrival order");
    }
}

#[test]
fn test_property_listener_sees_each_best_chain_tx_once() {
    let (engine, genesis) = spv_engine();
    let listener = RecordingListener::new();
    engine.add_listener(listener.clone());

    // A linear chain of full blocks submitted with orphans and
    // duplicates; no re-orgs, so best-chain delivery must be exactly
    // once per transaction.
    let mut blocks = Vec::new();
    let mut tip = genesis.clone();
    for i in 0..5u64 {
        let block = next_full_block(
            &tip,
            genesis.header.timestamp + 600 * (i + 1),
            vec![coinbase(50, i)],
        );
        tip = tip.build_next(&block.header).unwrap();
        blocks.push(block);
    }

    let _ = engine.add(blocks[3].clone()).unwrap(); // orphan
    let _ = engine.add(blocks[4].clone()).unwrap(); // orphan
    for block in &blocks {
        let _ = engine.add(block.clone()).unwrap();
    }
    for block in &blocks {
        let _ = engine.add(block.clone()).unwrap(); // full duplicate pass
    }
    assert_eq!(engine.best_height(), 5);

    let mut seen = listener.received(NewBlockKind::BestChain);
    let total = seen.len();
    seen.sort();
    seen.dedup();
    assert_eq!(total, seen.len(), "a transaction was delivered twice");
    assert_eq!(total, 5);
}

#[test]
fn test_property_bloom_merge_covers_both_sources() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut a = BloomFilter::new(200, 0.01, 0xF00D, UpdatePolicy::None).unwrap();
    let mut b = BloomFilter::new(200, 0.01, 0xF00D, UpdatePolicy::None).unwrap();

    let items: Vec<[u8; 16]> = (0..200).map(|_| rng.gen()).collect();
    for (i, item) in items.iter().enumerate() {
        if i % 2 == 0 {
            a.insert(item);
        } else {
            b.insert(item);
        }
    }

    let mut merged = a.clone();
    merged.merge(&b).unwrap();

    // Everything either source matches, the union matches.
    for item in &items {
        assert!(merged.contains(item));
    }
    let probes: Vec<[u8; 16]> = (0..1000).map(|_| rng.gen()).collect();
    for probe in &probes {
        if a.contains(probe) || b.contains(probe) {
            assert!(merged.contains(probe));
        }
    }
}

#[test]
fn test_property_head_reads_do_not_block_behind_adds() {
    let (engine, genesis) = spv_engine();
    let blocks = header_chain(&genesis, 30, 0);

    let writer_engine = engine.clone();
    let writer = std::thread::spawn(move || {
        for block in blocks {
            writer_engine.add(block).unwrap();
        }
    });

    // Readers poll the head latch while the writer holds the engine
    // mutex; they must always see a coherent, monotonic head.
    let mut last_height = 0;
    while !writer.is_finished() {
        let head = engine.chain_head();
        assert!(head.height >= last_height);
        last_height = head.height;
        let _ = engine.best_height();
    }
    writer.join().unwrap();
    assert_eq!(engine.best_height(), 30);
}
