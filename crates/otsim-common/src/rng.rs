//! Process-wide seeded random streams.
//!
//! The simulator keeps four independent generator objects so that the
//! consumers of randomness do not perturb each other's sequences: the
//! node-seed stream (per-node firmware seeds), the radio-model stream
//! (fading draws), the fail-time stream (failure scheduling), and the unit
//! stream (uniform `[0,1)` draws for packet loss and frame-error rolls).
//!
//! Call [`init`] once at startup with the scenario's root seed. A root seed
//! of `0` seeds from OS entropy; any other value makes runs reproducible.
//! Re-initializing resets all four streams, which tests rely on.

use parking_lot::Mutex;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;

struct Streams {
    node_seed: ChaCha12Rng,
    radio_model: ChaCha12Rng,
    fail_time: ChaCha12Rng,
    unit: ChaCha12Rng,
}

impl Streams {
    fn new(root_seed: u64) -> Self {
        // Distinct stream constants keep the four sequences independent even
        // though they share a root seed.
        Streams {
            node_seed: ChaCha12Rng::seed_from_u64(root_seed ^ 0x6e6f_6465),
            radio_model: ChaCha12Rng::seed_from_u64(root_seed ^ 0x7261_6469_6f00),
            fail_time: ChaCha12Rng::seed_from_u64(root_seed ^ 0x6661_696c),
            unit: ChaCha12Rng::seed_from_u64(root_seed ^ 0x756e_6974),
        }
    }
}

static STREAMS: Mutex<Option<Streams>> = Mutex::new(None);

/// Initialize (or reset) all random streams from `root_seed`.
///
/// A `root_seed` of `0` draws a fresh seed from OS entropy. Returns the
/// effective root seed so it can be logged for later reproduction.
pub fn init(root_seed: u64) -> u64 {
    let seed = if root_seed == 0 {
        rand::thread_rng().next_u64()
    } else {
        root_seed
    };
    *STREAMS.lock() = Some(Streams::new(seed));
    seed
}

fn with_streams<R>(f: impl FnOnce(&mut Streams) -> R) -> R {
    let mut guard = STREAMS.lock();
    let streams = guard.get_or_insert_with(|| Streams::new(rand::thread_rng().next_u64()));
    f(streams)
}

/// Draw a firmware seed for a newly created node.
pub fn next_node_seed() -> u32 {
    with_streams(|s| s.node_seed.next_u32())
}

/// Uniform draw in `[0, span)` microseconds from the fail-time stream.
///
/// `span == 0` returns 0.
pub fn fail_time_uniform(span: u64) -> u64 {
    if span == 0 {
        return 0;
    }
    with_streams(|s| s.fail_time.gen_range(0..span))
}

/// Uniform `[0, 1)` draw from the unit stream.
pub fn unit() -> f64 {
    with_streams(|s| s.unit.gen::<f64>())
}

/// Run `f` with the radio-model stream.
///
/// The radio models use this for their fading distributions; taking a
/// closure keeps the stream object from escaping the table.
pub fn with_radio_model<R>(f: impl FnOnce(&mut dyn RngCore) -> R) -> R {
    with_streams(|s| f(&mut s.radio_model))
}
