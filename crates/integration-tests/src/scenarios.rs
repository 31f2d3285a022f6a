//! Concrete end-to-end scenarios against the assembled engine.

use std::sync::Arc;

use ember_chain::{
    ChainEngine, ChainError, FullConnector, MemoryBlockStore, NetworkParameters, NewBlockKind,
    StoredBlock,
};
use ember_chain::test_utils::{coinbase, next_full_block, next_header_block};
use ember_types::{FilteredBlock, PartialMerkleTree, Transaction};

use crate::harness::{BrokenScriptListener, Event, RecordingListener, SelfRemovingListener};

fn spv_engine() -> (Arc<ChainEngine>, StoredBlock) {
    let params = NetworkParameters::unit_test();
    let store = Arc::new(MemoryBlockStore::new(&params).unwrap());
    let engine = Arc::new(ChainEngine::new_header_only(params, store).unwrap());
    let genesis = engine.chain_head();
    (engine, genesis)
}

fn full_engine() -> (Arc<ChainEngine>, Arc<FullConnector>, Arc<MemoryBlockStore>, StoredBlock) {
    let params = NetworkParameters::unit_test();
    let store = Arc::new(MemoryBlockStore::new(&params).unwrap());
    let connector = Arc::new(FullConnector::new(store.clone()));
    let engine =
        Arc::new(ChainEngine::new(params, store.clone(), connector.clone()).unwrap());
    let genesis = engine.chain_head();
    (engine, connector, store, genesis)
}

fn ts(genesis: &StoredBlock, step: u64) -> u64 {
    genesis.header.timestamp + step
}

#[test]
fn test_s1_linear_extension() {
    let (engine, genesis) = spv_engine();
    let listener = RecordingListener::indifferent();
    engine.add_listener(listener.clone());

    let b1 = next_header_block(&genesis, ts(&genesis, 600));
    let s1 = genesis.build_next(&b1.header).unwrap();
    let b2 = next_header_block(&s1, ts(&genesis, 1200));
    let s2 = s1.build_next(&b2.header).unwrap();
    let b3 = next_header_block(&s2, ts(&genesis, 1800));

    assert!(engine.add(b1.clone()).unwrap());
    assert!(engine.add(b2.clone()).unwrap());
    assert!(engine.add(b3.clone()).unwrap());

    assert_eq!(engine.best_height(), 3);
    assert_eq!(engine.chain_head().hash(), b3.hash());
    assert_eq!(
        listener.best_block_hashes(),
        vec![b1.hash(), b2.hash(), b3.hash()]
    );
    assert!(listener.reorganizations().is_empty());
}

#[test]
fn test_s2_orphan_deferral_and_replay() {
    let (engine, genesis) = spv_engine();
    let listener = RecordingListener::indifferent();
    engine.add_listener(listener.clone());

    let b1 = next_header_block(&genesis, ts(&genesis, 600));
    let s1 = genesis.build_next(&b1.header).unwrap();
    let b2 = next_header_block(&s1, ts(&genesis, 1200));
    let s2 = s1.build_next(&b2.header).unwrap();
    let b3 = next_header_block(&s2, ts(&genesis, 1800));

    // b3 arrives first: parent unknown.
    assert!(!engine.add(b3.clone()).unwrap());
    assert!(engine.is_orphan(&b3.hash()));
    assert_eq!(engine.best_height(), 0);

    // Submitting the same orphan again is still a polite no.
    assert!(!engine.add(b3.clone()).unwrap());

    assert!(engine.add(b1.clone()).unwrap());
    assert_eq!(engine.best_height(), 1);
    assert!(engine.is_orphan(&b3.hash()));

    // b2 unlocks the replay, which must connect b3 in the same call.
    assert!(engine.add(b2.clone()).unwrap());
    assert!(!engine.is_orphan(&b3.hash()));
    assert_eq!(engine.best_height(), 3);
    assert_eq!(engine.chain_head().hash(), b3.hash());

    // No duplicate notifications from the replay.
    assert_eq!(
        listener.best_block_hashes(),
        vec![b1.hash(), b2.hash(), b3.hash()]
    );
}

#[test]
fn test_s3_side_chain_without_reorg() {
    let (engine, genesis) = spv_engine();
    let listener = RecordingListener::new();
    engine.add_listener(listener.clone());

    let cb1 = coinbase(50, 1);
    let cb2 = coinbase(50, 2);
    let cb3 = coinbase(50, 3);
    let cb4 = coinbase(50, 4);

    let m1 = next_full_block(&genesis, ts(&genesis, 600), vec![cb1.clone()]);
    let sm1 = genesis.build_next(&m1.header).unwrap();
    let m2 = next_full_block(&sm1, ts(&genesis, 1200), vec![cb2.clone()]);

    let f1 = next_full_block(&genesis, ts(&genesis, 660), vec![cb3.clone()]);
    let sf1 = genesis.build_next(&f1.header).unwrap();
    let f2 = next_full_block(&sf1, ts(&genesis, 1260), vec![cb4.clone()]);

    assert!(engine.add(m1).unwrap());
    assert!(engine.add(m2.clone()).unwrap());
    assert!(engine.add(f1).unwrap());
    assert!(engine.add(f2).unwrap());

    // Head unchanged: the fork never gathered more work.
    assert_eq!(engine.chain_head().hash(), m2.hash());
    assert!(listener.reorganizations().is_empty());

    assert_eq!(
        listener.received(NewBlockKind::BestChain),
        vec![cb1.hash(), cb2.hash()]
    );
    assert_eq!(
        listener.received(NewBlockKind::SideChain),
        vec![cb3.hash(), cb4.hash()]
    );
}

#[test]
fn test_s4_reorg_header_only() {
    let (engine, genesis) = spv_engine();
    let listener = RecordingListener::indifferent();
    engine.add_listener(listener.clone());

    let m1 = next_header_block(&genesis, ts(&genesis, 600));
    let sm1 = genesis.build_next(&m1.header).unwrap();
    let m2 = next_header_block(&sm1, ts(&genesis, 1200));
    let sm2 = sm1.build_next(&m2.header).unwrap();

    let f1 = next_header_block(&genesis, ts(&genesis, 660));
    let sf1 = genesis.build_next(&f1.header).unwrap();
    let f2 = next_header_block(&sf1, ts(&genesis, 1260));
    let sf2 = sf1.build_next(&f2.header).unwrap();
    let f3 = next_header_block(&sf2, ts(&genesis, 1860));

    for block in [&m1, &m2, &f1, &f2] {
        engine.add(block.clone()).unwrap();
    }
    assert_eq!(engine.chain_head().hash(), m2.hash());

    // The third fork block tips the balance.
    assert!(engine.add(f3.clone()).unwrap());
    assert_eq!(engine.chain_head().hash(), f3.hash());
    assert_eq!(engine.best_height(), 3);

    let reorgs = listener.reorganizations();
    assert_eq!(reorgs.len(), 1);
    assert_eq!(
        reorgs[0],
        Event::Reorganized {
            split: genesis.hash(),
            old: vec![m2.hash(), m1.hash()],
            new: vec![f3.hash(), f2.hash(), f1.hash()],
        }
    );

    // Re-org blocks announce through `reorganize`, not new-best-block.
    assert_eq!(listener.best_block_hashes(), vec![m1.hash(), m2.hash()]);
}

#[test]
fn test_s4_reorg_full_mode_rewrites_utxo() {
    let (engine, connector, _store, genesis) = full_engine();
    let listener = RecordingListener::new();
    engine.add_listener(listener.clone());

    let cb_a = coinbase(50, 0xA);
    let cb_b = coinbase(50, 0xB);
    let cb_c = coinbase(50, 0xC);
    let cb_d = coinbase(50, 0xD);
    let cb_e = coinbase(50, 0xE);

    let m1 = next_full_block(&genesis, ts(&genesis, 600), vec![cb_a.clone()]);
    let sm1 = genesis.build_next(&m1.header).unwrap();
    let m2 = next_full_block(&sm1, ts(&genesis, 1200), vec![cb_b.clone()]);

    let f1 = next_full_block(&genesis, ts(&genesis, 660), vec![cb_c.clone()]);
    let sf1 = genesis.build_next(&f1.header).unwrap();
    let f2 = next_full_block(&sf1, ts(&genesis, 1260), vec![cb_d.clone()]);
    let sf2 = sf1.build_next(&f2.header).unwrap();
    let f3 = next_full_block(&sf2, ts(&genesis, 1860), vec![cb_e.clone()]);

    for block in [&m1, &m2, &f1, &f2] {
        engine.add(block.clone()).unwrap();
    }
    assert!(engine.add(f3.clone()).unwrap());

    assert_eq!(engine.chain_head().hash(), f3.hash());
    assert_eq!(listener.reorganizations().len(), 1);

    // The UTXO set is exactly the fork chain's outputs now.
    let utxo = connector.utxo_snapshot();
    for cb in [&cb_c, &cb_d, &cb_e] {
        assert!(utxo.contains(&ember_types::OutPoint::new(cb.hash(), 0)));
    }
    for cb in [&cb_a, &cb_b] {
        assert!(!utxo.contains(&ember_types::OutPoint::new(cb.hash(), 0)));
    }
}

#[test]
fn test_s5_pruned_reorg_is_abandoned() {
    let (engine, connector, store, genesis) = full_engine();

    let m1 = next_full_block(&genesis, ts(&genesis, 600), vec![coinbase(50, 0xA)]);
    let sm1 = genesis.build_next(&m1.header).unwrap();
    let m2 = next_full_block(&sm1, ts(&genesis, 1200), vec![coinbase(50, 0xB)]);

    let f1 = next_full_block(&genesis, ts(&genesis, 660), vec![coinbase(50, 0xC)]);
    let sf1 = genesis.build_next(&f1.header).unwrap();
    let f2 = next_full_block(&sf1, ts(&genesis, 1260), vec![coinbase(50, 0xD)]);
    let sf2 = sf1.build_next(&f2.header).unwrap();
    let f3 = next_full_block(&sf2, ts(&genesis, 1860), vec![coinbase(50, 0xE)]);

    for block in [&m1, &m2, &f1, &f2] {
        engine.add(block.clone()).unwrap();
    }

    // The store lost the fork's bodies before the fork won.
    store.prune(&f1.hash());
    let utxo_before = connector.utxo_snapshot();

    let err = engine.add(f3.clone()).unwrap_err();
    match err {
        ChainError::Pruned { hash } => assert_eq!(hash, f1.hash()),
        other => panic!("expected Pruned, got {other}"),
    }

    // The re-org was abandoned wholesale: head and UTXO state unmoved.
    assert_eq!(engine.chain_head().hash(), m2.hash());
    assert_eq!(connector.utxo_snapshot(), utxo_before);
}

#[test]
fn test_s6_duplicate_submit_is_silent() {
    let (engine, genesis) = spv_engine();
    let listener = RecordingListener::indifferent();
    engine.add_listener(listener.clone());

    let b1 = next_header_block(&genesis, ts(&genesis, 600));
    let s1 = genesis.build_next(&b1.header).unwrap();
    let b2 = next_header_block(&s1, ts(&genesis, 1200));

    assert!(engine.add(b1).unwrap());
    assert!(engine.add(b2.clone()).unwrap());
    let events_before = listener.events().len();

    assert!(engine.add(b2).unwrap());
    assert_eq!(listener.events().len(), events_before);
}

#[test]
fn test_filtered_block_delivery() {
    let (engine, genesis) = spv_engine();
    let listener = RecordingListener::new();
    engine.add_listener(listener.clone());

    let cb = coinbase(50, 1);
    // Non-coinbase spends, standing in for wallet-relevant payments.
    let mut paid = coinbase(25, 2);
    paid.inputs[0].outpoint.txid = [9u8; 32];
    let mut other = coinbase(25, 3);
    other.inputs[0].outpoint.txid = [8u8; 32];

    let block = next_full_block(
        &genesis,
        ts(&genesis, 600),
        vec![cb.clone(), paid.clone(), other.clone()],
    );
    let txids: Vec<_> = [&cb, &paid, &other].iter().map(|tx| tx.hash()).collect();

    // The filter matched `paid` (body attached) and `other` (body not
    // attached, e.g. already seen in loose broadcast).
    let tree = PartialMerkleTree::from_txids(&txids, &[false, true, true]);
    let filtered = FilteredBlock::new(block.header.clone(), tree, vec![paid.clone()]);

    assert!(engine.add_filtered(filtered).unwrap());
    assert_eq!(engine.best_height(), 1);

    let events = listener.events();
    assert!(events.contains(&Event::Received {
        tx: paid.hash(),
        block: block.hash(),
        kind: NewBlockKind::BestChain,
    }));
    assert!(events.contains(&Event::HashSeen {
        tx: other.hash(),
        block: block.hash(),
        kind: NewBlockKind::BestChain,
    }));
    assert!(events.contains(&Event::NewBestBlock { block: block.hash() }));
    // The attached body is never double-reported as a bare hash.
    assert!(!events.contains(&Event::HashSeen {
        tx: paid.hash(),
        block: block.hash(),
        kind: NewBlockKind::BestChain,
    }));
}

#[test]
fn test_filtered_block_with_foreign_transaction_rejected() {
    let (engine, genesis) = spv_engine();

    let cb = coinbase(50, 1);
    let block = next_full_block(&genesis, ts(&genesis, 600), vec![cb.clone()]);
    let tree = PartialMerkleTree::from_txids(&[cb.hash()], &[true]);

    let foreign: Transaction = coinbase(50, 99);
    let filtered = FilteredBlock::new(block.header.clone(), tree, vec![foreign]);

    let err = engine.add_filtered(filtered).unwrap_err();
    assert!(err.to_string().contains("filtered set"), "{err}");
}

#[test]
fn test_broken_listener_does_not_break_the_chain() {
    let (engine, genesis) = spv_engine();
    let broken = Arc::new(BrokenScriptListener::default());
    let recording = RecordingListener::new();
    engine.add_listener(broken.clone());
    engine.add_listener(recording.clone());

    let cb = coinbase(50, 1);
    let b1 = next_full_block(&genesis, ts(&genesis, 600), vec![cb.clone()]);
    assert!(engine.add(b1).unwrap());

    assert!(*broken.calls.lock() > 0);
    assert_eq!(recording.received(NewBlockKind::BestChain), vec![cb.hash()]);
}

#[test]
fn test_listener_removing_itself_during_reorg() {
    let (engine, genesis) = spv_engine();
    let quitter = Arc::new(SelfRemovingListener::default());
    quitter.wire(engine.clone());
    let recording = RecordingListener::indifferent();
    engine.add_listener(recording.clone());

    let m1 = next_header_block(&genesis, ts(&genesis, 600));
    let f1 = next_header_block(&genesis, ts(&genesis, 660));
    let sf1 = genesis.build_next(&f1.header).unwrap();
    let f2 = next_header_block(&sf1, ts(&genesis, 1260));
    let sf2 = sf1.build_next(&f2.header).unwrap();
    let f3 = next_header_block(&sf2, ts(&genesis, 1860));

    engine.add(m1).unwrap();
    engine.add(f1).unwrap();
    engine.add(f2).unwrap(); // first re-org: fork is now longer
    engine.add(f3).unwrap(); // extension, no re-org

    assert_eq!(*quitter.reorg_calls.lock(), 1);
    assert_eq!(recording.reorganizations().len(), 1);

    // A second fork re-orgs again; the removed listener stays silent.
    let g1 = next_header_block(&genesis, ts(&genesis, 700));
    let sg1 = genesis.build_next(&g1.header).unwrap();
    let g2 = next_header_block(&sg1, ts(&genesis, 1300));
    let sg2 = sg1.build_next(&g2.header).unwrap();
    let g3 = next_header_block(&sg2, ts(&genesis, 1900));
    let sg3 = sg2.build_next(&g3.header).unwrap();
    let g4 = next_header_block(&sg3, ts(&genesis, 2500));

    for block in [g1, g2, g3, g4] {
        engine.add(block).unwrap();
    }

    assert_eq!(*quitter.reorg_calls.lock(), 1);
    assert_eq!(recording.reorganizations().len(), 2);
}
