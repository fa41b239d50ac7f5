use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail, ensure};
use assoc_cache::{AssociationSlot, CacheKind, CacheOwner, ComputeValue, StoreConfig, StoreStats};
use rand::Rng;

use crate::config::Workload;

/// An owner object of the stresstest.
#[derive(Debug)]
pub struct Subject {
    id: usize,
    slot: AssociationSlot,
}

impl CacheOwner for Subject {
    fn association_slot(&self) -> &AssociationSlot {
        &self.slot
    }
}

/// A value that records which pair it was created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tagged {
    pub subject: usize,
    pub kind: usize,
}

/// Produces [`Tagged`] values, optionally burning some CPU time first.
#[derive(Debug)]
pub struct Tagging {
    kind: usize,
    cost: Duration,
    computations: AtomicU64,
}

impl Tagging {
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }
}

impl ComputeValue for Tagging {
    type Owner = Subject;
    type Value = Tagged;
    type Error = Infallible;

    fn compute_value(&self, subject: &Subject) -> Result<Tagged, Infallible> {
        self.computations.fetch_add(1, Ordering::Relaxed);
        if !self.cost.is_zero() {
            let start = Instant::now();
            while start.elapsed() < self.cost {
                std::hint::spin_loop();
            }
        }
        Ok(Tagged {
            subject: subject.id,
            kind: self.kind,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Get,
    Remove,
    Put,
}

/// A workload with its owners and kinds set up.
pub struct PreparedWorkload {
    pub name: String,
    pub threads: usize,
    remove_ratio: f64,
    put_ratio: f64,
    subjects: Vec<Subject>,
    kinds: Vec<CacheKind<Tagging>>,
}

pub fn prepare_workload(workload: Workload, store: StoreConfig) -> Result<PreparedWorkload> {
    let Workload {
        name,
        threads,
        owners,
        kinds,
        remove_ratio,
        put_ratio,
        compute_cost,
    } = workload;

    ensure!(threads > 0, "workload {name}: needs at least one thread");
    ensure!(
        owners > 0 && kinds > 0,
        "workload {name}: needs at least one owner and kind"
    );
    ensure!(
        remove_ratio >= 0.0 && put_ratio >= 0.0 && remove_ratio + put_ratio <= 1.0,
        "workload {name}: remove_ratio and put_ratio must add up to at most 1"
    );

    let subjects: Vec<Subject> = (0..owners)
        .map(|id| {
            Ok(Subject {
                id,
                slot: AssociationSlot::with_config(store)?,
            })
        })
        .collect::<Result<_>>()?;
    let kinds: Vec<_> = (0..kinds)
        .map(|kind| {
            CacheKind::new(Tagging {
                kind,
                cost: compute_cost,
                computations: AtomicU64::new(0),
            })
            .with_name(format!("{name}-{kind}"))
        })
        .collect();

    Ok(PreparedWorkload {
        name,
        threads,
        remove_ratio,
        put_ratio,
        subjects,
        kinds,
    })
}

impl PreparedWorkload {
    /// Computes every value once.
    pub fn warm_up(&self) -> Result<()> {
        for subject in &self.subjects {
            for (index, kind) in self.kinds.iter().enumerate() {
                let Ok(value) = kind.get(subject);
                check_value(&value, subject, index)?;
            }
        }
        Ok(())
    }

    /// Runs one random operation on a random pair.
    pub fn run_operation(&self, rng: &mut impl Rng) -> Result<Operation> {
        let subject = &self.subjects[rng.random_range(0..self.subjects.len())];
        let index = rng.random_range(0..self.kinds.len());
        let kind = &self.kinds[index];

        let roll: f64 = rng.random();
        if roll < self.remove_ratio {
            kind.remove(subject);
            Ok(Operation::Remove)
        } else if roll < self.remove_ratio + self.put_ratio {
            let value = Tagged {
                subject: subject.id,
                kind: index,
            };
            kind.put(subject, value);
            Ok(Operation::Put)
        } else {
            let Ok(value) = kind.get(subject);
            check_value(&value, subject, index)?;
            Ok(Operation::Get)
        }
    }

    /// Number of computations across all kinds.
    pub fn computations(&self) -> u64 {
        self.kinds
            .iter()
            .map(|kind| kind.computation().computations())
            .sum()
    }

    /// Combined stats of all backing stores.
    pub fn store_stats(&self) -> StoreStats {
        let mut total = StoreStats {
            entries: 0,
            cache_capacity: 0,
            cache_load: 0,
        };
        for stats in self
            .subjects
            .iter()
            .filter_map(|subject| subject.association_slot().stats())
        {
            total.entries += stats.entries;
            total.cache_capacity += stats.cache_capacity;
            total.cache_load += stats.cache_load;
        }
        total
    }
}

fn check_value(value: &Tagged, subject: &Subject, kind: usize) -> Result<()> {
    if value.subject != subject.id || value.kind != kind {
        bail!("got {value:?} for subject {} and kind {kind}", subject.id);
    }
    Ok(())
}
