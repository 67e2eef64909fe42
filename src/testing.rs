//! Shared fixtures for the unit tests.

use crate::arch::sim::SimPort;
use crate::config::{Config, IDLE_STACK};
use crate::memory::StackArena;
use crate::scheduler::Scheduler;

pub extern "C" fn task_a() {}

pub extern "C" fn task_b() {}

pub extern "C" fn task_c() {}

/// A fresh scheduler over the simulation port, not yet started.
pub fn scheduler() -> (Scheduler<SimPort>, Box<StackArena>) {
    (Scheduler::new(SimPort::new(), Config::DEFAULT), Box::new(StackArena::new()))
}

/// A started scheduler with the tick source on and the idle task running.
pub fn booted() -> (Scheduler<SimPort>, Box<StackArena>) {
    let (mut s, arena) = scheduler();
    s.start_ticks();
    s.create_idle(&arena, IDLE_STACK).unwrap();
    s.start();
    (s, arena)
}
