//! Benchmarks for variable lookup in a populated store.
//!
//! Lookup is a linear scan over every record, so its cost grows with the number of records in the store, including
//! retired copies that have not been reclaimed yet.
//!
//! ## Benchmark execution
//!
//! Running this exact benchmark can be done with the following command:
//!
//! `> cargo make bench -p patina_variable_store --bench bench_lookup`
//!
//! If you wish to run a subset of benchmarks in this file, you can filter them by name:
//!
//! `> cargo make bench -p patina_variable_store --bench bench_lookup -- <filter>`
//!
//! ## Examples
//!
//! ```bash
//! > cargo make bench -p patina_variable_store --bench bench_lookup -- get_variable
//! > cargo make bench -p patina_variable_store --bench bench_lookup -- reclaim
//! ```
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use patina_pi::variable::{VariableAlignment, VariableAttributes};
use patina_variable_store::VariableStore;
use r_efi::efi;
use rand::{seq::SliceRandom, Rng};

const STORE_SIZE: usize = 0x40000;
const VENDOR: efi::Guid =
    efi::Guid::from_fields(0x8be4df61, 0x93ca, 0x11d2, 0xaa, 0x0d, &[0x00, 0xe0, 0x98, 0x03, 0x2b, 0x8c]);

fn attributes() -> VariableAttributes {
    VariableAttributes::NON_VOLATILE | VariableAttributes::BOOTSERVICE_ACCESS | VariableAttributes::RUNTIME_ACCESS
}

fn names(count: usize) -> Vec<String> {
    (0..count).map(|index| format!("Boot{index:04X}")).collect()
}

/// Fills `buffer` with `count` variables of random size, each updated `updates` times.
fn populate<'a>(buffer: &'a mut [u8], names: &[String], updates: usize) -> VariableStore<'a> {
    let mut rng = rand::thread_rng();
    let mut store = VariableStore::format(buffer, VariableAlignment::X86).unwrap();
    for _ in 0..=updates {
        for name in names {
            let data: Vec<u8> = (0..rng.gen_range(1..64)).map(|_| rng.gen()).collect();
            store.set_variable(name, &VENDOR, attributes(), &data).unwrap();
        }
    }
    store
}

fn benchmark_get_variable(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_variable");
    for (count, updates) in [(16, 0), (128, 0), (128, 4)] {
        let names = names(count);
        let mut lookups = names.clone();
        lookups.shuffle(&mut rand::thread_rng());

        let mut buffer = vec![0u8; STORE_SIZE];
        let store = populate(&mut buffer, &names, updates);
        group.bench_with_input(BenchmarkId::new(format!("{count}_variables"), updates), &store, |b, store| {
            b.iter(|| {
                for name in &lookups {
                    store.get_variable(name, &VENDOR).unwrap();
                }
            })
        });
    }
    group.finish();
}

fn benchmark_reclaim(c: &mut Criterion) {
    let mut group = c.benchmark_group("reclaim");
    let names = names(128);
    let mut template = vec![0u8; STORE_SIZE];
    populate(&mut template, &names, 4);

    group.bench_function(BenchmarkId::new("128_variables", 4), |b| {
        b.iter_batched_ref(
            || template.clone(),
            |buffer| {
                let mut store = VariableStore::open(buffer, VariableAlignment::X86).unwrap();
                store.reclaim().unwrap()
            },
            criterion::BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(benches, benchmark_get_variable, benchmark_reclaim);
criterion_main!(benches);
