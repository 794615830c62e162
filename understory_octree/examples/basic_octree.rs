// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Basic usage of Understory Octree: build, query, close, and report usage.

use understory_octree::{BackendKind, CloseFlags, PointIndex, SetupFlags};

fn main() {
    let points: Vec<([f64; 3], u32)> = (0..1000_u32)
        .map(|i| {
            let t = f64::from(i) * 0.1;
            ([t.cos() * 10.0, t.sin() * 10.0, t * 0.5], i)
        })
        .collect();

    let mut idx = PointIndex::builder("helix")
        .points(&points)
        .min_distance(0.01)
        .max_distance(2.0)
        .backend(BackendKind::ZOrderHashed)
        .flags(SetupFlags::BULK_INSERT)
        .build()
        .expect("valid setup");

    let q = [10.0, 0.0, 0.0];
    if let Some(hit) = idx.find(q, true) {
        println!("nearest to {q:?}: #{} at {:?}", hit.payload(), hit.real());
    }
    match idx.search([0.0, 0.0, 100.0], 1.0) {
        Some(hit) => println!("within 1.0 of the axis: #{}", hit.payload()),
        None => println!("nothing within 1.0 of (0, 0, 100)"),
    }

    print!("{}", idx.usage(6));
    idx.close(CloseFlags::COMPACT | CloseFlags::SORT);
    print!("{}", idx.usage(6));

    let again = idx.find(q, true).map(|l| l.payload());
    println!("after close: {again:?}");
    idx.destroy();
}
