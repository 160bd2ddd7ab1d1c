use std::sync::{Arc, Barrier};
use std::thread;

use canopy::{
    payload, AdjacencyList, Hierarchy, HierarchyError, MemoryStore, NestedSet, NodeId,
    PathEnumeration, Result, SqliteOptions, SqliteStore,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const NUM_THREADS: usize = 8;
const OPERATIONS_PER_THREAD: usize = 50;

#[test]
fn concurrent_child_creation_keeps_intervals() -> Result<()> {
    let h = Arc::new(NestedSet::new(Arc::new(MemoryStore::new())));
    let root = h.create_root(payload("num", 0))?;
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let mut handles = Vec::new();
    for thread_id in 0..NUM_THREADS {
        let h = Arc::clone(&h);
        let barrier = Arc::clone(&barrier);
        let root_id = root.id;
        handles.push(thread::spawn(move || -> Result<Vec<NodeId>> {
            barrier.wait();
            let mut parent = root_id;
            let mut created = Vec::new();
            for i in 0..OPERATIONS_PER_THREAD {
                let num = (thread_id * OPERATIONS_PER_THREAD + i) as i64 + 1;
                let row = h.create_child(parent, payload("num", num))?;
                // Every third node starts a deeper level.
                if i % 3 == 0 {
                    parent = row.id;
                }
                created.push(row.id);
            }
            Ok(created)
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap()?);
    }

    assert_eq!(all.len(), NUM_THREADS * OPERATIONS_PER_THREAD);
    assert_eq!(h.descendant_count(root.id)?, all.len() as u64);
    let report = h.check_integrity()?;
    assert!(report.success, "{:?}", report.findings);
    Ok(())
}

#[test]
fn concurrent_reparents_never_form_cycles() -> Result<()> {
    let h = Arc::new(AdjacencyList::new(Arc::new(MemoryStore::new())));
    let ids: Vec<NodeId> = (0..12)
        .map(|num| h.create_root(payload("num", num)).map(|row| row.id))
        .collect::<Result<_>>()?;
    let ids = Arc::new(ids);
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let h = Arc::clone(&h);
            let ids = Arc::clone(&ids);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<usize> {
                let mut rng = ChaCha8Rng::seed_from_u64(thread_id as u64);
                let mut rejected = 0;
                barrier.wait();
                for _ in 0..OPERATIONS_PER_THREAD * 4 {
                    let child = ids[rng.gen_range(0..ids.len())];
                    let parent = rng
                        .gen_bool(0.85)
                        .then(|| ids[rng.gen_range(0..ids.len())]);
                    match h.set_parent(child, parent) {
                        Ok(()) => {}
                        Err(HierarchyError::Cycle { .. }) => rejected += 1,
                        Err(other) => return Err(other),
                    }
                }
                Ok(rejected)
            })
        })
        .collect();

    let mut rejected = 0;
    for handle in handles {
        rejected += handle.join().unwrap()?;
    }
    assert!(rejected > 0);

    let report = h.check_integrity()?;
    assert!(report.success, "{:?}", report.findings);
    for id in ids.iter() {
        h.root(*id)?;
    }
    Ok(())
}

#[test]
fn concurrent_moves_in_disjoint_subtrees() -> Result<()> {
    let h = Arc::new(NestedSet::new(Arc::new(MemoryStore::new())));
    let mut groups = Vec::new();
    for group in 0..4i64 {
        let root = h.create_root(payload("num", group * 100))?;
        let mut members = vec![root.id];
        for i in 1..10 {
            let parent = members[(i - 1) / 2];
            members.push(h.create_child(parent, payload("num", group * 100 + i as i64))?.id);
        }
        groups.push(members);
    }

    let handles: Vec<_> = groups
        .clone()
        .into_iter()
        .enumerate()
        .map(|(seed, members)| {
            let h = Arc::clone(&h);
            thread::spawn(move || -> Result<()> {
                let mut rng = ChaCha8Rng::seed_from_u64(seed as u64 + 100);
                for _ in 0..OPERATIONS_PER_THREAD {
                    // Keep the group root in place so groups stay disjoint.
                    let child = members[rng.gen_range(1..members.len())];
                    let parent = members[rng.gen_range(0..members.len())];
                    match h.set_parent(child, Some(parent)) {
                        Ok(()) | Err(HierarchyError::Cycle { .. }) => {}
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap()?;
    }

    let report = h.check_integrity()?;
    assert!(report.success, "{:?}", report.findings);
    for members in &groups {
        assert_eq!(h.descendant_count(members[0])?, (members.len() - 1) as u64);
        for id in &members[1..] {
            assert_eq!(h.root(*id)?.id, members[0]);
        }
    }
    Ok(())
}

#[test]
fn shared_sqlite_store_serializes_writers() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("shared.db"), &SqliteOptions::default())?;
    let h = Arc::new(PathEnumeration::new(Arc::new(store))?);
    let root = h.create_root(payload("num", 0))?;
    let barrier = Arc::new(Barrier::new(4));

    let mut handles = Vec::new();
    for thread_id in 0..4i64 {
        let h = Arc::clone(&h);
        let barrier = Arc::clone(&barrier);
        let root_id = root.id;
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            let branch = h.create_child(root_id, payload("num", thread_id))?;
            let mut parent = branch.id;
            for depth in 0..10i64 {
                parent = h.create_child(parent, payload("num", depth))?.id;
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    assert_eq!(h.direct_children(root.id)?.len(), 4);
    assert_eq!(h.descendants(root.id)?.len(), 44);
    assert!(h.check_integrity()?.success);
    Ok(())
}

#[test]
fn separate_sqlite_connections_share_one_file() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let options = SqliteOptions::default();
    let first = NestedSet::new(SqliteStore::open(&path, &options)?);
    let root = first.create_root(payload("num", 0))?;
    let second = NestedSet::new(SqliteStore::open(&path, &options)?);
    let barrier = Arc::new(Barrier::new(2));

    let mut handles = Vec::new();
    for (thread_id, h) in [first, second].into_iter().enumerate() {
        let barrier = Arc::clone(&barrier);
        let root_id = root.id;
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for i in 0..OPERATIONS_PER_THREAD * 4 {
                let num = (thread_id * 1_000 + i) as i64;
                h.create_child(root_id, payload("num", num))?;
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    let h = NestedSet::new(SqliteStore::open(&path, &options)?);
    assert_eq!(
        h.descendant_count(root.id)?,
        (2 * OPERATIONS_PER_THREAD * 4) as u64
    );
    let report = h.check_integrity()?;
    assert!(report.success, "{:?}", report.findings);
    Ok(())
}
