//! End-to-end timeline scenarios on the scripted guest runtime.

use mulligan_engine::{
    Engine, EngineConfig, EngineError, GuestFault, GuestInstance, GuestModule, InstantiateError,
    TickConfig, Timestamp, Value, PAGE_SIZE,
};
use mulligan_harness::{engine_digest, Op, ScriptedModule};

fn ts(time: i64, offset: u32, player: u32) -> Timestamp {
    Timestamp::new(time, offset, player)
}

fn counter_module() -> ScriptedModule {
    ScriptedModule::new(1)
        .with_global(Value::I64(0))
        .with_export("inc", vec![Op::AddGlobal { index: 0, delta: 1 }])
        .with_export("tick", vec![Op::AddGlobal { index: 0, delta: 1 }])
        .with_export("get", vec![Op::ReturnGlobal { index: 0 }])
        .with_export("noop", vec![])
}

fn counter_engine() -> Engine {
    Engine::setup(Box::new(counter_module()), EngineConfig::default()).unwrap()
}

fn grower_module() -> ScriptedModule {
    ScriptedModule::new(1)
        .with_export(
            "alloc",
            vec![
                Op::Grow { pages: 1 },
                Op::Store {
                    addr: PAGE_SIZE as u32,
                    bytes: vec![0xAB],
                },
            ],
        )
        .with_export("noop", vec![])
}

#[test]
fn single_call_executes_at_its_timestamp() {
    let mut engine = counter_engine();
    engine.call_at(ts(1, 0, 0), "inc", &[]).unwrap();

    assert_eq!(engine.global(0), Some(Value::I64(1)));
    assert_eq!(engine.call_log().timestamps(), vec![ts(1, 0, 0)]);
}

#[test]
fn late_insert_rewinds_and_replays() {
    let mut engine = counter_engine();
    engine.call_at(ts(1, 0, 0), "inc", &[]).unwrap();
    engine.call_at(ts(3, 0, 0), "inc", &[]).unwrap();
    engine.call_at(ts(3, 1, 0), "inc", &[]).unwrap();
    assert_eq!(engine.global(0), Some(Value::I64(3)));

    // Time 2 arrives after time 3 already executed.
    engine.call_at(ts(2, 0, 0), "inc", &[]).unwrap();

    assert_eq!(engine.global(0), Some(Value::I64(4)));
    assert_eq!(
        engine.call_log().timestamps(),
        vec![ts(1, 0, 0), ts(2, 0, 0), ts(3, 0, 0), ts(3, 1, 0)]
    );
}

#[test]
fn grow_is_undone_by_reinstantiation_and_replayed() {
    let mut engine = Engine::setup(Box::new(grower_module()), EngineConfig::default()).unwrap();

    engine.call_at(ts(5, 0, 0), "alloc", &[]).unwrap();
    assert_eq!(engine.memory().len(), 2 * PAGE_SIZE);
    assert_eq!(engine.memory()[PAGE_SIZE], 0xAB);

    // The noop lands before the alloc: its execution sees pre-grow memory,
    // then the replayed alloc restores the grown page.
    engine.call_at(ts(4, 0, 0), "noop", &[]).unwrap();

    assert_eq!(engine.memory().len(), 2 * PAGE_SIZE);
    assert_eq!(engine.memory()[PAGE_SIZE], 0xAB);
    assert_eq!(
        engine.call_log().timestamps(),
        vec![ts(4, 0, 0), ts(5, 0, 0)]
    );
}

#[test]
fn grow_undo_preserves_globals_written_before_the_grow() {
    let module = grower_module()
        .with_global(Value::I64(0))
        .with_export("set5", vec![Op::SetGlobal {
            index: 0,
            value: Value::I64(5),
        }]);
    let mut engine = Engine::setup(Box::new(module), EngineConfig::default()).unwrap();
    engine.call_at(ts(10, 0, 0), "set5", &[]).unwrap();
    engine.call_at(ts(20, 0, 0), "alloc", &[]).unwrap();

    // Rewinding through the grow reinstantiates the guest; the global set
    // at time 10 must survive.
    engine.call_at(ts(15, 0, 0), "noop", &[]).unwrap();

    assert_eq!(engine.global(0), Some(Value::I64(5)));
    assert_eq!(engine.memory()[PAGE_SIZE], 0xAB);
}

#[test]
fn transient_call_reverts_a_grow() {
    let mut engine = Engine::setup(Box::new(grower_module()), EngineConfig::default()).unwrap();
    let before = engine_digest(&engine);

    engine.call_and_revert("alloc", &[]).unwrap();

    assert_eq!(engine.memory().len(), PAGE_SIZE);
    assert_eq!(engine_digest(&engine), before);
    assert_eq!(engine.journal_len(), 0);
}

#[test]
fn recurring_ticks_fire_on_interval() {
    let config = EngineConfig {
        ticks: TickConfig {
            interval: 10,
            next_fire_time: 0,
            function: "tick".to_string(),
        },
        start_time: 0,
    };
    let mut engine = Engine::setup(Box::new(counter_module()), config).unwrap();

    engine.advance_time(35).unwrap();

    assert_eq!(engine.global(0), Some(Value::I64(3)));
    assert_eq!(engine.next_fire_time(), 30);
    assert_eq!(engine.current_time(), 35);
    assert_eq!(
        engine.call_log().timestamps(),
        vec![ts(10, 0, 0), ts(20, 0, 0), ts(30, 0, 0)]
    );
}

#[test]
fn ticks_interleave_with_late_user_calls() {
    let config = EngineConfig {
        ticks: TickConfig {
            interval: 10,
            next_fire_time: 0,
            function: "tick".to_string(),
        },
        start_time: 0,
    };
    let mut engine = Engine::setup(Box::new(counter_module()), config).unwrap();
    engine.advance_time(35).unwrap();

    // A remote call stamped between the first and second tick.
    engine.call_at(ts(10, 1, 7), "inc", &[]).unwrap();
    assert_eq!(engine.global(0), Some(Value::I64(4)));

    // Locally stamped submissions never collide with tick timestamps.
    let local = engine.next_timestamp(3);
    assert!(local.offset >= 1);
    engine.call_at(local, "inc", &[]).unwrap();
    assert_eq!(engine.global(0), Some(Value::I64(5)));
}

#[test]
fn advance_time_without_interval_is_a_noop() {
    let mut engine = counter_engine();
    engine.advance_time(35).unwrap();

    assert_eq!(engine.current_time(), 0);
    assert_eq!(engine.global(0), Some(Value::I64(0)));
    assert!(engine.call_log().is_empty());
}

#[test]
fn transient_call_leaves_state_and_timeline_alone() {
    let mut engine = Engine::setup(
        Box::new(
            counter_module().with_export("set5", vec![Op::SetGlobal {
                index: 0,
                value: Value::I64(5),
            }]),
        ),
        EngineConfig::default(),
    )
    .unwrap();
    engine.call_at(ts(1, 0, 0), "set5", &[]).unwrap();
    let journal_before = engine.journal_len();
    let digest_before = engine_digest(&engine);

    let got = engine.call_and_revert("inc", &[]).unwrap();
    assert_eq!(got, None);

    assert_eq!(engine.global(0), Some(Value::I64(5)));
    assert_eq!(engine.journal_len(), journal_before);
    assert_eq!(engine_digest(&engine), digest_before);
    assert_eq!(engine.call_log().len(), 1);

    // Transient queries can read state through a returning export.
    let got = engine.call_and_revert("get", &[]).unwrap();
    assert_eq!(got, Some(Value::I64(5)));
}

#[test]
fn compaction_drops_prefix_and_rebases() {
    let mut engine = counter_engine();
    for time in 1..=5 {
        engine.call_at(ts(time, 0, 0), "inc", &[]).unwrap();
    }
    assert_eq!(engine.journal_len(), 5);

    let removed = engine.forget_before(ts(3, 0, 0)).unwrap();

    assert_eq!(removed, 2);
    assert_eq!(
        engine.call_log().timestamps(),
        vec![ts(3, 0, 0), ts(4, 0, 0), ts(5, 0, 0)]
    );
    assert_eq!(engine.call_log().get(0).unwrap().journal_len_before, 0);
    assert_eq!(engine.journal_len(), 3);

    // Inserts at or above the horizon behave as if nothing was compacted.
    engine.call_at(ts(4, 1, 1), "inc", &[]).unwrap();
    assert_eq!(engine.global(0), Some(Value::I64(6)));
}

#[test]
fn compaction_past_every_entry_clears_history() {
    let mut engine = counter_engine();
    for time in 1..=3 {
        engine.call_at(ts(time, 0, 0), "inc", &[]).unwrap();
    }

    let removed = engine.forget_before(ts(100, 0, 0)).unwrap();

    assert_eq!(removed, 3);
    assert!(engine.call_log().is_empty());
    assert_eq!(engine.journal_len(), 0);
    // The state itself is untouched.
    assert_eq!(engine.global(0), Some(Value::I64(3)));
}

#[test]
fn reset_adopts_a_larger_snapshot() {
    let mut engine = counter_engine();
    engine.call_at(ts(1, 0, 0), "inc", &[]).unwrap();

    let mut image = vec![0u8; 2 * PAGE_SIZE];
    image[0] = 0xCD;
    image[2 * PAGE_SIZE - 1] = 0xEF;
    engine.reset(&image, 50, 60).unwrap();

    assert_eq!(engine.memory(), &image[..]);
    assert_eq!(engine.journal_len(), 0);
    assert!(engine.call_log().is_empty());
    assert_eq!(engine.current_time(), 50);
    assert_eq!(engine.next_fire_time(), 60);

    // The timeline restarts; globals are untouched by a grown reset.
    engine.call_at(ts(51, 0, 0), "inc", &[]).unwrap();
    assert_eq!(engine.global(0), Some(Value::I64(2)));
}

#[test]
fn reset_adopts_a_smaller_snapshot_by_reinstantiating() {
    let module = grower_module()
        .with_global(Value::I64(0))
        .with_export("set5", vec![Op::SetGlobal {
            index: 0,
            value: Value::I64(5),
        }]);
    let mut engine = Engine::setup(Box::new(module), EngineConfig::default()).unwrap();
    engine.call_at(ts(1, 0, 0), "set5", &[]).unwrap();
    engine.call_at(ts(2, 0, 0), "alloc", &[]).unwrap();
    assert_eq!(engine.memory().len(), 2 * PAGE_SIZE);

    let image = vec![0x11u8; 16];
    engine.reset(&image, 0, 0).unwrap();

    assert_eq!(engine.memory().len(), PAGE_SIZE);
    assert_eq!(&engine.memory()[..16], &image[..]);
    assert!(engine.memory()[16..].iter().all(|&b| b == 0));
    // Globals ride through a shrinking reset unchanged.
    assert_eq!(engine.global(0), Some(Value::I64(5)));
}

#[test]
fn missing_export_reports_without_touching_the_timeline() {
    let mut engine = counter_engine();
    engine.call_at(ts(1, 0, 0), "inc", &[]).unwrap();
    let digest = engine_digest(&engine);

    let err = engine.call_at(ts(2, 0, 0), "absent", &[]).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Guest {
            fault: GuestFault::MissingExport { .. },
            ..
        }
    ));

    assert_eq!(engine.call_log().len(), 1);
    assert_eq!(engine.journal_len(), 1);
    assert_eq!(engine_digest(&engine), digest);
}

#[test]
fn trapped_call_is_kept_as_a_stable_noop() {
    let module = counter_module().with_export(
        "boom",
        vec![
            Op::AddGlobal { index: 0, delta: 9 },
            Op::Trap {
                message: "kaboom".to_string(),
            },
        ],
    );
    let mut engine = Engine::setup(Box::new(module), EngineConfig::default()).unwrap();
    engine.call_at(ts(5, 0, 0), "inc", &[]).unwrap();

    let err = engine.call_at(ts(6, 0, 0), "boom", &[]).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Guest {
            fault: GuestFault::Trap { .. },
            ..
        }
    ));

    // The partial mutation was rewound, the entry was kept.
    assert_eq!(engine.global(0), Some(Value::I64(1)));
    assert_eq!(engine.call_log().len(), 2);

    // Inserting before the trapped entry replays it; it traps again
    // identically, and the surrounding timeline still converges.
    let err = engine.call_at(ts(4, 0, 0), "inc", &[]).unwrap_err();
    assert!(matches!(err, EngineError::Guest { name, .. } if name == "boom"));
    assert_eq!(engine.global(0), Some(Value::I64(2)));
    assert_eq!(
        engine.call_log().timestamps(),
        vec![ts(4, 0, 0), ts(5, 0, 0), ts(6, 0, 0)]
    );
}

#[test]
fn out_of_order_and_duplicate_submissions_are_rejected() {
    let mut engine = counter_engine();
    engine.call_at(ts(5, 2, 1), "inc", &[]).unwrap();

    // Decreasing offset within the same (time, player).
    let err = engine.call_at(ts(5, 1, 1), "inc", &[]).unwrap_err();
    assert!(matches!(err, EngineError::OutOfOrder { .. }));

    // Exact duplicate.
    let err = engine.call_at(ts(5, 2, 1), "inc", &[]).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateTimestamp { .. }));

    // Rejections touch nothing.
    assert_eq!(engine.global(0), Some(Value::I64(1)));
    assert_eq!(engine.call_log().len(), 1);

    // A different player may still use the same time tick.
    engine.call_at(ts(5, 1, 2), "inc", &[]).unwrap();
    assert_eq!(engine.global(0), Some(Value::I64(2)));
}

#[test]
fn diagnostics_do_not_touch_the_journal() {
    let module = counter_module().with_export(
        "announce",
        vec![
            Op::Store {
                addr: 64,
                bytes: b"ready".to_vec(),
            },
            Op::Log { addr: 64, len: 5 },
            Op::LogError { addr: 64, len: 5 },
        ],
    );
    let mut engine = Engine::setup(Box::new(module), EngineConfig::default()).unwrap();

    engine.call_at(ts(1, 0, 0), "announce", &[]).unwrap();

    // Only the store is journaled; the two diagnostic emissions are not.
    assert_eq!(engine.journal_len(), 1);
    assert_eq!(&engine.memory()[64..69], b"ready");
}

/// Module whose reinstantiation path always fails, for poisoning tests.
struct BrokenReinstantiate(ScriptedModule);

impl GuestModule for BrokenReinstantiate {
    fn instantiate(
        &self,
        memory: Option<&[u8]>,
    ) -> Result<Box<dyn GuestInstance>, InstantiateError> {
        if memory.is_some() {
            return Err(InstantiateError::new("runtime out of memory"));
        }
        self.0.instantiate(None)
    }
}

#[test]
fn failed_grow_undo_poisons_the_engine() {
    let module = BrokenReinstantiate(grower_module());
    let mut engine = Engine::setup(Box::new(module), EngineConfig::default()).unwrap();
    engine.call_at(ts(5, 0, 0), "alloc", &[]).unwrap();

    // Inserting before the alloc forces a grow-undo, which reinstantiates.
    let err = engine.call_at(ts(4, 0, 0), "noop", &[]).unwrap_err();
    assert!(matches!(err, EngineError::Rewind(_)));
    assert!(engine.is_poisoned());

    // Everything afterwards rejects.
    assert!(matches!(
        engine.call_at(ts(6, 0, 0), "noop", &[]),
        Err(EngineError::Poisoned)
    ));
    assert!(matches!(
        engine.call_and_revert("noop", &[]),
        Err(EngineError::Poisoned)
    ));
    assert!(matches!(engine.advance_time(10), Err(EngineError::Poisoned)));
    assert!(matches!(
        engine.reset(&[], 0, 0),
        Err(EngineError::Poisoned)
    ));
    assert!(matches!(
        engine.forget_before(ts(0, 0, 0)),
        Err(EngineError::Poisoned)
    ));
}
