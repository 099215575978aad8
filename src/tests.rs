use core::ptr::NonNull;
use std::collections::BTreeSet;

use rand::{
  Rng,
  SeedableRng,
  rngs::StdRng,
};

use crate::{
  LargeTlsf,
  MediumTlsf,
  SmallTlsf,
  Tlsf,
  TlsfError,
  block,
  index,
  sync::LockedTlsf,
  width::IndexWidth,
};

/// Walks the whole arena and cross-checks it against the free-list index:
/// blocks tile the padded capacity exactly, every footer matches its
/// header, no two free blocks are adjacent, the prev-free hints are
/// accurate, the occupancy bitmaps agree with the bucket heads, and the
/// bucket lists contain exactly the free blocks found in the walk.
fn assert_consistent<W: IndexWidth>(tlsf: &Tlsf<W>) {
  if tlsf.capacity() == 0 {
    return;
  }
  let arena = tlsf.raw_arena();
  let padded = tlsf.total_size();

  let mut off = 0;
  let mut prev_free = false;
  let mut free_total = 0;
  let mut free_offsets = BTreeSet::new();
  while off < padded {
    let header = block::read_header::<W>(arena, off);
    assert!(
      header.size >= block::min_block_size::<W>(),
      "undersized block at {off}"
    );
    assert_eq!(
      block::read_footer::<W>(arena, off, header.size),
      header.size,
      "footer mismatch at {off}"
    );
    assert_eq!(header.prev_free, prev_free, "stale prev-free hint at {off}");
    assert!(!(header.free && prev_free), "uncoalesced free neighbors at {off}");
    if header.free {
      free_total += header.size;
      free_offsets.insert(off);
    }
    prev_free = header.free;
    off += header.size;
  }
  assert_eq!(off, padded, "blocks do not tile the padded arena");
  assert_eq!(free_total, tlsf.free_bytes(), "free byte counter drift");

  let mut listed = BTreeSet::new();
  for fl in 0..tlsf.class_limit() {
    let word = tlsf.sl_bitmask(fl);
    assert_eq!(
      tlsf.fl_bitmask() & (1u64 << fl) != 0,
      word != 0,
      "first-level bit {fl} disagrees with second-level mask"
    );
    for sl in 0..index::SL_BUCKETS {
      let head = tlsf.bucket_head(fl, sl);
      assert_eq!(
        word & (1 << sl) != 0,
        head.is_some(),
        "second-level bit ({fl}, {sl}) disagrees with bucket head"
      );

      let mut back: Option<usize> = None;
      let mut cur = head;
      while let Some(at) = cur {
        match block::Block::read::<W>(arena, at) {
          block::Block::Free { size, next, prev } => {
            assert_eq!(index::mapping(size), (fl, sl), "block {at} in wrong bucket");
            assert_eq!(prev, back, "broken back link at {at}");
            assert!(listed.insert(at), "block {at} linked twice");
            back = Some(at);
            cur = next;
          }
          block::Block::Allocated { .. } => panic!("allocated block {at} on a free list"),
        }
      }
    }
  }
  assert_eq!(listed, free_offsets, "free lists disagree with the arena walk");
}

fn payload<'a>(ptr: NonNull<u8>, len: usize) -> &'a mut [u8] {
  unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), len) }
}

#[test]
fn test_construction_geometry() {
  let tlsf = MediumTlsf::new(1024);
  assert_eq!(tlsf.capacity(), 1024);
  assert_eq!(tlsf.total_size(), 1032);
  assert_eq!(tlsf.free_bytes(), 1032);
  assert_eq!(tlsf.bytes_remaining(), 1024);
  // single free block spanning the padded arena
  let (fl, sl) = index::mapping(1032);
  assert_eq!(tlsf.bucket_head(fl, sl), Some(0));
  assert_consistent(&tlsf);
}

#[test]
fn test_zero_capacity_is_inert() {
  let mut tlsf = MediumTlsf::new(0);
  assert_eq!(tlsf.capacity(), 0);
  assert_eq!(tlsf.total_size(), 0);
  assert_eq!(tlsf.bytes_remaining(), 0);
  assert!(tlsf.allocate(16).is_none());

  let mut none = None;
  tlsf.deallocate(&mut none);
  assert!(none.is_none());
}

#[test]
fn test_try_new_rejections() {
  assert!(matches!(
    MediumTlsf::try_new(0),
    Err(TlsfError::ZeroCapacity)
  ));
  assert!(matches!(
    MediumTlsf::try_new(4),
    Err(TlsfError::BelowMinimum {
      requested: 4,
      minimum: 8
    })
  ));
  // u16 preset tops out near 8 KiB once the header shift is accounted for
  assert!(matches!(SmallTlsf::try_new(9000), Err(TlsfError::Overflow)));
  assert!(matches!(
    MediumTlsf::try_new(usize::MAX),
    Err(TlsfError::Overflow)
  ));

  // the same capacities leave `new` inert instead
  assert_eq!(SmallTlsf::new(9000).capacity(), 0);
}

#[test]
fn test_round_trip_bytes() {
  let mut tlsf = MediumTlsf::new(1024);
  let p1 = tlsf.allocate(64).unwrap();
  let p2 = tlsf.allocate(64).unwrap();
  assert_ne!(p1, p2);
  assert_consistent(&tlsf);

  for (i, byte) in payload(p1, 64).iter_mut().enumerate() {
    *byte = i as u8;
  }
  payload(p2, 64).fill(0xAB);

  for (i, byte) in payload(p1, 64).iter().enumerate() {
    assert_eq!(*byte, i as u8);
  }
  assert!(payload(p2, 64).iter().all(|&b| b == 0xAB));
}

#[test]
fn test_failed_allocation_mutates_nothing() {
  let mut tlsf = MediumTlsf::new(1024);
  let keep = tlsf.allocate(100).unwrap();
  let before = tlsf.index_snapshot();
  let remaining = tlsf.bytes_remaining();

  assert!(tlsf.allocate(0).is_none());
  assert!(tlsf.allocate(usize::MAX - 2).is_none());
  assert!(tlsf.allocate(2000).is_none());
  assert!(tlsf.allocate(7).is_none()); // below the minimum block

  assert_eq!(tlsf.index_snapshot(), before);
  assert_eq!(tlsf.bytes_remaining(), remaining);
  assert_consistent(&tlsf);
  drop(keep);
}

#[test]
fn test_exhaustion_boundary() {
  let mut tlsf = MediumTlsf::new(1024);
  // one past the maximum request fails...
  assert!(tlsf.allocate(1017).is_none());
  // ...the maximum itself succeeds exactly once
  let mut handle = tlsf.allocate(1016);
  assert!(handle.is_some());
  assert_eq!(tlsf.bytes_remaining(), 0);
  assert!(tlsf.allocate(8).is_none());
  assert_consistent(&tlsf);

  tlsf.deallocate(&mut handle);
  assert_eq!(tlsf.bytes_remaining(), 1024);
  assert!(tlsf.allocate(1016).is_some());
}

#[test]
fn test_double_free_is_noop() {
  let mut tlsf = MediumTlsf::new(1024);
  let mut handle = tlsf.allocate(64);
  let raw = handle.unwrap();

  tlsf.deallocate(&mut handle);
  assert!(handle.is_none());
  let remaining = tlsf.bytes_remaining();
  let snapshot = tlsf.index_snapshot();

  // the cleared handle is a no-op
  tlsf.deallocate(&mut handle);
  // so is a stale copy of the original pointer
  let mut stale = Some(raw);
  tlsf.deallocate(&mut stale);

  assert_eq!(tlsf.bytes_remaining(), remaining);
  assert_eq!(tlsf.index_snapshot(), snapshot);
  assert_consistent(&tlsf);
}

#[test]
fn test_foreign_pointer_is_noop() {
  let mut tlsf = MediumTlsf::new(1024);
  let _keep = tlsf.allocate(64).unwrap();
  let remaining = tlsf.bytes_remaining();

  let mut local = 0u8;
  let mut foreign = Some(NonNull::from(&mut local));
  tlsf.deallocate(&mut foreign);

  // rejected frees leave the handle untouched
  assert!(foreign.is_some());
  assert_eq!(tlsf.bytes_remaining(), remaining);
  assert_consistent(&tlsf);
}

#[test]
fn test_forged_interior_pointer_is_noop() {
  let mut tlsf = MediumTlsf::new(1024);
  let p = tlsf.allocate(64).unwrap();
  let _pin = tlsf.allocate(64).unwrap();
  let remaining = tlsf.bytes_remaining();
  let snapshot = tlsf.index_snapshot();

  // forge a plausible allocated header inside the live payload; the bytes
  // in front of it decode to a garbage boundary tag
  let bytes = payload(p, 64);
  bytes[0..4].copy_from_slice(&0u32.to_le_bytes());
  bytes[4..8].copy_from_slice(&(64u32 << 3).to_le_bytes());

  let mut forged = NonNull::new(unsafe { p.as_ptr().add(8) });
  assert!(forged.is_some());
  tlsf.deallocate(&mut forged);

  // rejected like any other foreign pointer: handle kept, state untouched
  assert!(forged.is_some());
  assert_eq!(tlsf.bytes_remaining(), remaining);
  assert_eq!(tlsf.index_snapshot(), snapshot);
  assert_consistent(&tlsf);
}

#[test]
fn test_coalescing_all_orders() {
  for order in [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
  ] {
    let mut tlsf = MediumTlsf::new(1024);
    let mut handles = [tlsf.allocate(64), tlsf.allocate(64), tlsf.allocate(64)];
    assert!(handles.iter().all(Option::is_some));

    for at in order {
      tlsf.deallocate(&mut handles[at]);
      assert_consistent(&tlsf);
    }

    // everything merged back into the single spanning block
    assert_eq!(tlsf.free_bytes(), tlsf.total_size(), "order {order:?}");
    let (fl, sl) = index::mapping(tlsf.total_size());
    assert_eq!(tlsf.bucket_head(fl, sl), Some(0));
    assert!(tlsf.allocate(1016).is_some());
  }
}

#[test]
fn test_fragmentation_scenario() {
  let mut tlsf = MediumTlsf::new(1024);
  let mut p1 = tlsf.allocate(64);
  let mut p2 = tlsf.allocate(64);
  assert_ne!(p1, p2);

  tlsf.deallocate(&mut p1);
  assert_consistent(&tlsf);

  // the good-fit search reuses the freed region over the large tail block
  let _p3 = tlsf.allocate(32).unwrap();
  assert_consistent(&tlsf);

  tlsf.deallocate(&mut p2);
  assert_consistent(&tlsf);

  // accumulated block overhead keeps a full-sized request from fitting
  assert!(tlsf.allocate(1000).is_none());
  assert!(tlsf.allocate(800).is_some());
  assert_consistent(&tlsf);
}

#[test]
fn test_reuses_freed_region() {
  let mut tlsf = MediumTlsf::new(1024);
  let mut p1 = tlsf.allocate(64);
  let first = p1.unwrap();
  let _p2 = tlsf.allocate(64).unwrap();

  tlsf.deallocate(&mut p1);
  let p3 = tlsf.allocate(32).unwrap();
  assert_eq!(p3, first);
}

#[test]
fn test_split_remainder_too_small_widens() {
  let mut tlsf = MediumTlsf::new(1024);
  // carve the arena down to one free block of exactly 72 bytes
  let mut hole = tlsf.allocate(64);
  let _pin = tlsf.allocate(64).unwrap();
  tlsf.deallocate(&mut hole);

  // 60 + overhead = 68; the 4-byte remainder cannot host a free block,
  // so the allocation is widened to the whole 72
  let before = tlsf.free_bytes();
  let p = tlsf.allocate(60).unwrap();
  assert_eq!(tlsf.free_bytes(), before - 72);
  assert_consistent(&tlsf);

  let mut handle = Some(p);
  tlsf.deallocate(&mut handle);
  assert_eq!(tlsf.free_bytes(), before);
  assert_consistent(&tlsf);
}

#[test]
fn test_minimum_request_per_width() {
  let mut medium = MediumTlsf::new(1024);
  assert!(medium.allocate(7).is_none());
  assert!(medium.allocate(8).is_some());

  let mut large = LargeTlsf::new(1024);
  assert!(large.allocate(15).is_none());
  assert!(large.allocate(16).is_some());

  let mut small = SmallTlsf::new(1024);
  assert!(small.allocate(11).is_none());
  assert!(small.allocate(12).is_some());
}

#[test]
fn test_smallest_viable_arena() {
  let mut tlsf = MediumTlsf::new(16);
  assert_eq!(tlsf.total_size(), 24);
  // the minimum request fits exactly once, widened over the whole arena
  let mut handle = tlsf.allocate(8);
  assert!(handle.is_some());
  assert_eq!(tlsf.free_bytes(), 0);
  assert!(tlsf.allocate(8).is_none());
  tlsf.deallocate(&mut handle);
  assert!(tlsf.allocate(8).is_some());
}

#[test]
fn test_presets_smoke() {
  let mut small = SmallTlsf::new(4096);
  let mut a = small.allocate(128);
  assert!(a.is_some());
  small.deallocate(&mut a);
  assert_eq!(small.free_bytes(), small.total_size());
  assert_consistent(&small);

  let mut large = LargeTlsf::new(1 << 20);
  let mut b = large.allocate(4096);
  assert!(b.is_some());
  large.deallocate(&mut b);
  assert_eq!(large.free_bytes(), large.total_size());
  assert_consistent(&large);
}

#[test]
fn test_index_snapshot_diagnostics() {
  let tlsf = MediumTlsf::new(1024);
  let snapshot = tlsf.index_snapshot();
  assert_eq!(snapshot.class_count(), 7);
  assert_eq!(snapshot.fl_bitmask(), tlsf.fl_bitmask());

  let (fl, sl) = index::mapping(1032);
  assert_ne!(snapshot.fl_bitmask() & (1 << fl), 0);
  assert_ne!(snapshot.sl_bitmask(fl) & (1 << sl), 0);
}

#[test]
fn test_locked_wrapper() {
  let tlsf = LockedTlsf::<u32>::new(1024);
  assert_eq!(tlsf.capacity(), 1024);

  let mut handle = tlsf.allocate(64);
  assert!(handle.is_some());
  assert_eq!(tlsf.bytes_remaining(), 1024 - 72);

  tlsf.deallocate(&mut handle);
  assert!(handle.is_none());
  assert_eq!(tlsf.bytes_remaining(), 1024);

  let free_bytes = tlsf.with(|t| t.free_bytes());
  assert_eq!(free_bytes, tlsf.with(|t| t.total_size()));
}

#[test]
fn test_random_churn() {
  let mut rng = StdRng::seed_from_u64(0x7153_F17A);
  let mut tlsf = MediumTlsf::new(1 << 16);
  let mut handles: Vec<Option<NonNull<u8>>> = Vec::new();

  for step in 0..4000 {
    let live = handles.iter().filter(|h| h.is_some()).count();
    if live == 0 || rng.random_range(0..10) < 6 {
      let size = rng.random_range(8..600);
      if let Some(ptr) = tlsf.allocate(size) {
        // scribble over the payload to catch metadata overlap
        payload(ptr, size).fill(0x5A);
        handles.push(Some(ptr));
      }
    } else {
      let at = rng.random_range(0..handles.len());
      tlsf.deallocate(&mut handles[at]);
    }

    if step % 128 == 0 {
      assert_consistent(&tlsf);
    }
  }

  for handle in handles.iter_mut() {
    tlsf.deallocate(handle);
  }
  assert_eq!(tlsf.free_bytes(), tlsf.total_size());
  assert_consistent(&tlsf);
}
