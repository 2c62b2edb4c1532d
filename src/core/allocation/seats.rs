// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authoritative seat accounting.
//!
//! ## Overview
//!
//! The [`SeatLedger`] is the single source of truth for live occupancy.
//! Entity rows fetched from the store are detached copies and say nothing
//! about how many seats are taken *now*; every capacity decision goes through
//! the ledger instead.
//!
//! Reservation is a compare-and-swap loop bounded by the configured capacity,
//! so concurrent allocation passes can never oversell an event. A grant that
//! subsequently fails to persist must hand its seat back via
//! [`SeatLedger::release`].

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::core::entity::{Event, EventId};

/// Result of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// One seat is now held by the caller.
    Reserved,
    /// The event is at capacity.
    Full,
    /// The ledger has never seen this event.
    UntrackedEvent,
}

#[derive(Debug)]
struct EventSeats {
    capacity: AtomicU32,
    confirmed: AtomicU32,
}

/// Per-event seat counters, shared across all allocation workers.
#[derive(Debug, Default)]
pub struct SeatLedger {
    seats: DashMap<EventId, Arc<EventSeats>>,
}

impl SeatLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `event` is tracked, adopting its configured capacity.
    /// Already-confirmed counts are left untouched; lowering the capacity of
    /// a partially filled event simply stops further grants.
    pub fn ensure_event(&self, event: &Event) {
        match self.seats.get(&event.id) {
            Some(entry) => {
                entry
                    .capacity
                    .store(event.max_participants, Ordering::Release);
            }
            None => {
                self.seats.entry(event.id).or_insert_with(|| {
                    Arc::new(EventSeats {
                        capacity: AtomicU32::new(event.max_participants),
                        confirmed: AtomicU32::new(0),
                    })
                });
            }
        }
    }

    /// Seed the confirmed counter, used when rebuilding from storage.
    pub fn set_confirmed(&self, event: EventId, confirmed: u32) {
        if let Some(entry) = self.seats.get(&event) {
            entry.confirmed.store(confirmed, Ordering::Release);
        }
    }

    /// Try to take one seat. Succeeds only while `confirmed < capacity`.
    pub fn try_reserve(&self, event: EventId) -> ReserveOutcome {
        let entry = match self.seats.get(&event) {
            Some(entry) => Arc::clone(&entry),
            None => return ReserveOutcome::UntrackedEvent,
        };
        loop {
            let capacity = entry.capacity.load(Ordering::Acquire);
            let confirmed = entry.confirmed.load(Ordering::Acquire);
            if confirmed >= capacity {
                return ReserveOutcome::Full;
            }
            match entry.confirmed.compare_exchange(
                confirmed,
                confirmed + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ReserveOutcome::Reserved,
                Err(_) => continue,
            }
        }
    }

    /// Hand back a seat taken by [`try_reserve`](Self::try_reserve) whose
    /// registration did not materialize. Saturates at zero.
    pub fn release(&self, event: EventId) {
        if let Some(entry) = self.seats.get(&event) {
            loop {
                let confirmed = entry.confirmed.load(Ordering::Acquire);
                if confirmed == 0 {
                    return;
                }
                if entry
                    .confirmed
                    .compare_exchange(
                        confirmed,
                        confirmed - 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return;
                }
            }
        }
    }

    pub fn confirmed(&self, event: EventId) -> Option<u32> {
        self.seats
            .get(&event)
            .map(|e| e.confirmed.load(Ordering::Acquire))
    }

    pub fn capacity(&self, event: EventId) -> Option<u32> {
        self.seats
            .get(&event)
            .map(|e| e.capacity.load(Ordering::Acquire))
    }

    /// Whether the event still has at least one free seat. `None` for events
    /// the ledger does not track.
    pub fn has_free_seat(&self, event: EventId) -> Option<bool> {
        self.seats.get(&event).map(|e| {
            e.confirmed.load(Ordering::Acquire) < e.capacity.load(Ordering::Acquire)
        })
    }

    pub fn tracked_events(&self) -> usize {
        self.seats.len()
    }

    /// Drop all counters. Used before a rebuild.
    pub fn clear(&self) {
        self.seats.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::TenantId;
    use std::thread;

    fn event(id: u64, capacity: u32) -> Event {
        Event::new(EventId::new(id), TenantId::new(1), "ops lab", capacity)
    }

    #[test]
    fn reserve_until_full() {
        let ledger = SeatLedger::new();
        ledger.ensure_event(&event(1, 2));
        assert_eq!(ledger.try_reserve(EventId::new(1)), ReserveOutcome::Reserved);
        assert_eq!(ledger.try_reserve(EventId::new(1)), ReserveOutcome::Reserved);
        assert_eq!(ledger.try_reserve(EventId::new(1)), ReserveOutcome::Full);
        assert_eq!(ledger.confirmed(EventId::new(1)), Some(2));
    }

    #[test]
    fn untracked_event_is_reported() {
        let ledger = SeatLedger::new();
        assert_eq!(ledger.try_reserve(EventId::new(9)), ReserveOutcome::UntrackedEvent);
        assert_eq!(ledger.has_free_seat(EventId::new(9)), None);
    }

    #[test]
    fn release_hands_back_a_seat_and_saturates() {
        let ledger = SeatLedger::new();
        ledger.ensure_event(&event(1, 1));
        assert_eq!(ledger.try_reserve(EventId::new(1)), ReserveOutcome::Reserved);
        ledger.release(EventId::new(1));
        assert_eq!(ledger.confirmed(EventId::new(1)), Some(0));
        ledger.release(EventId::new(1));
        assert_eq!(ledger.confirmed(EventId::new(1)), Some(0));
        assert_eq!(ledger.try_reserve(EventId::new(1)), ReserveOutcome::Reserved);
    }

    #[test]
    fn capacity_update_keeps_confirmed() {
        let ledger = SeatLedger::new();
        ledger.ensure_event(&event(1, 5));
        ledger.try_reserve(EventId::new(1));
        ledger.try_reserve(EventId::new(1));
        // Admin lowers the capacity below the confirmed count.
        ledger.ensure_event(&event(1, 1));
        assert_eq!(ledger.confirmed(EventId::new(1)), Some(2));
        assert_eq!(ledger.try_reserve(EventId::new(1)), ReserveOutcome::Full);
        assert_eq!(ledger.has_free_seat(EventId::new(1)), Some(false));
    }

    #[test]
    fn concurrent_reservations_never_oversell() {
        let ledger = Arc::new(SeatLedger::new());
        ledger.ensure_event(&event(1, 10));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let ledger = Arc::clone(&ledger);
            handles.push(thread::spawn(move || {
                let mut won = 0u32;
                for _ in 0..100 {
                    if ledger.try_reserve(EventId::new(1)) == ReserveOutcome::Reserved {
                        won += 1;
                    }
                }
                won
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 10);
        assert_eq!(ledger.confirmed(EventId::new(1)), Some(10));
    }
}
