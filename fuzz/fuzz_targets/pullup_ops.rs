#![no_main]

//! Fuzz target for the pullup field queue.
//!
//! Runs arbitrary sequences of buffer, field and frame operations against a
//! small context and checks that every lock is returned at the end.

use libfuzzer_sys::fuzz_target;
use arbitrary::Arbitrary;
use transcode_pullup::{
    BufferLock, LockParity, MetricAcceleration, Parity, PullupConfig, PullupContext,
};

#[derive(Arbitrary, Debug)]
struct PullupInput {
    strict_pairs: bool,
    strict_breaks: u8,
    operations: Vec<Operation>,
}

#[derive(Arbitrary, Debug, Clone)]
enum Operation {
    /// Acquire a buffer for both fields and fill it
    AcquireBoth(u8),
    /// Acquire a buffer for one field
    AcquireField(bool),
    /// Release a held buffer by position
    Release(u8),
    /// Submit a field of a held buffer
    Submit(u8, bool),
    /// Pull a frame, optionally pack it, and release it
    Frame(bool),
    /// Pull a frame and keep it
    HoldFrame,
    /// Release a held frame
    ReleaseFrame,
    /// Drop a held frame without releasing it
    DropFrame,
    /// Drop queued fields
    Flush,
}

fuzz_target!(|input: PullupInput| {
    let mut config = PullupConfig::luma(48, 32);
    config.acceleration = MetricAcceleration::Scalar;
    config.strict_pairs = input.strict_pairs;
    config.strict_breaks = match input.strict_breaks % 3 {
        0 => transcode_pullup::BreakStrictness::Relaxed,
        1 => transcode_pullup::BreakStrictness::Normal,
        _ => transcode_pullup::BreakStrictness::Strict,
    };
    let Ok(mut ctx) = PullupContext::new(config) else {
        return;
    };

    let mut held: Vec<BufferLock> = Vec::new();
    let mut frame = None;
    let mut last_parity = None;

    for op in input.operations.iter().take(512) {
        match op {
            Operation::AcquireBoth(value) => {
                if let Ok(lock) = ctx.acquire_buffer(LockParity::Both) {
                    ctx.planes_mut(&lock)[0].fill(*value);
                    held.push(lock);
                }
            }
            Operation::AcquireField(bottom) => {
                let parity = if *bottom { Parity::Bottom } else { Parity::Top };
                if let Ok(lock) = ctx.acquire_buffer(parity) {
                    held.push(lock);
                }
            }
            Operation::Release(i) => {
                if !held.is_empty() {
                    let lock = held.swap_remove(*i as usize % held.len());
                    ctx.release_buffer(lock);
                }
            }
            Operation::Submit(i, bottom) => {
                if held.is_empty() {
                    continue;
                }
                let parity = if *bottom { Parity::Bottom } else { Parity::Top };
                let lock = &held[*i as usize % held.len()];
                let repeated = ctx.queued_fields() > 0 && last_parity == Some(parity);
                let result = ctx.submit_field(lock, parity);
                assert_eq!(result.is_err(), repeated);
                if result.is_ok() {
                    last_parity = Some(parity);
                }
            }
            Operation::Frame(pack) => {
                if frame.is_some() {
                    assert!(ctx.get_frame().is_err());
                    continue;
                }
                if let Ok(Some(mut f)) = ctx.get_frame() {
                    assert!((1..=3).contains(&f.length()));
                    if *pack {
                        let _ = ctx.pack_frame(&mut f);
                    }
                    ctx.release_frame(f);
                }
            }
            Operation::HoldFrame => {
                if frame.is_none() {
                    if let Ok(Some(f)) = ctx.get_frame() {
                        frame = Some(f);
                    }
                }
            }
            Operation::ReleaseFrame => {
                if let Some(f) = frame.take() {
                    ctx.release_frame(f);
                }
            }
            Operation::DropFrame => {
                drop(frame.take());
                assert!(!ctx.frame_outstanding());
            }
            Operation::Flush => {
                ctx.flush();
            }
        }

        let first = ctx.decide_frame_length();
        assert_eq!(first, ctx.decide_frame_length());
    }

    if let Some(f) = frame.take() {
        ctx.release_frame(f);
    }
    for lock in held {
        ctx.release_buffer(lock);
    }
    ctx.flush();
    assert_eq!(ctx.outstanding_locks(), 0);
});
