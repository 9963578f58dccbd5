use eodscan_core::{
    evaluate_block_eod, evaluate_streaming_eod, EngineArtifact, EodError, EodOutcome, EodStats, LiteralAction,
    ProgramRef, ProgramStep, ReportLog, Scratch, SimBackend, SimCounters, SimEngine, StreamState,
};

fn block(
    artifact: &EngineArtifact,
    backend: &mut SimBackend,
    state: &mut StreamState,
    data: &[u8],
    log: &mut ReportLog,
) -> (Result<EodOutcome, EodError>, Scratch) {
    let mut scratch = Scratch::new(artifact);
    let res = evaluate_block_eod(artifact, data.len() as u64, data, state, &mut scratch, backend, log);
    (res, scratch)
}

fn pairs(log: &ReportLog) -> Vec<(u64, u32)> {
    log.reports().iter().map(|r| (r.offset, r.id)).collect()
}

#[test]
fn no_eod_logic_completes_without_callbacks() {
    let artifact = EngineArtifact::builder(2, 2, 2).build().unwrap();
    let mut backend = SimBackend::builder(2).engine(0, SimEngine::accepting(&[1])).build().unwrap();
    let mut state = StreamState::new(&artifact);
    state.active.set(0);
    let mut log = ReportLog::default();

    let (res, scratch) = block(&artifact, &mut backend, &mut state, b"0123456789", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::NoEodLogic);
    assert!(log.reports().is_empty());
    assert_eq!(backend.counters, SimCounters::default());
    assert!(!scratch.can_stop_matching());
    // 引擎收尾不修改活动集合
    assert!(state.active.is_set(0));
}

#[test]
fn short_block_skips_anchored_scan_but_runs_other_steps() {
    let artifact = EngineArtifact::builder(2, 2, 2)
        .anchored_scanner(20, 32)
        .eod_engines(&[0])
        .eod_iter_program(ProgramRef(2))
        .build()
        .unwrap();
    let mut backend = SimBackend::builder(2)
        .program(ProgramRef(2), vec![ProgramStep::when_role(9, 0)])
        .literal(b"89", u64::MAX, LiteralAction::Report(77))
        .engine(0, SimEngine::accepting(&[5]))
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    state.active.set(0);
    state.roles.set(0);
    let mut log = ReportLog::default();

    let (res, scratch) = block(&artifact, &mut backend, &mut state, b"0123456789", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::Completed);
    assert_eq!(pairs(&log), vec![(10, 5), (10, 9)]);
    assert_eq!(scratch.stats.anchored_scans, 0);
    assert_eq!(scratch.stats.engines_checked, 1);
    // 迭代程序运行了两次（第二次时角色已被清除）
    assert_eq!(backend.counters.programs_run, 2);
    assert_eq!(scratch.stats.reports_delivered, 2);
}

#[test]
fn halt_in_unconditional_program_stops_everything() {
    let artifact = EngineArtifact::builder(2, 2, 2)
        .anchored_scanner(1, 16)
        .eod_program(ProgramRef(1))
        .eod_engines(&[0])
        .build()
        .unwrap();
    let mut backend = SimBackend::builder(2)
        .program(ProgramRef(1), vec![ProgramStep::report(1), ProgramStep::report(2)])
        .literal(b"x", u64::MAX, LiteralAction::Activate(1))
        .engine(0, SimEngine::accepting(&[3]))
        .engine(1, SimEngine::accepting(&[4]))
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    state.active.set(0);
    let mut log = ReportLog::new(Some(1));

    let (res, mut scratch) = block(&artifact, &mut backend, &mut state, b"xxx", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::Halted);
    assert_eq!(pairs(&log), vec![(3, 1)]);
    assert_eq!(backend.counters.final_checks, 0);
    assert_eq!(backend.counters.queue_execs, 0);
    assert_eq!(scratch.stats.anchored_scans, 0);
    assert!(scratch.can_stop_matching());

    // 停止后的工作区拒绝再次评估
    let err = evaluate_block_eod(&artifact, 3, b"xxx", &mut state, &mut scratch, &mut backend, &mut log).unwrap_err();
    assert_eq!(err, EodError::StreamTerminated);
}

#[test]
fn streaming_beyond_bound_touches_nothing() {
    let artifact = EngineArtifact::builder(2, 2, 2)
        .max_bi_anchored_width(Some(5))
        .anchored_scanner(1, 8)
        .eod_program(ProgramRef(1))
        .eod_engines(&[0])
        .build()
        .unwrap();
    let mut backend = SimBackend::builder(2)
        .program(ProgramRef(1), vec![ProgramStep::report(1)])
        .engine(0, SimEngine::accepting(&[3]))
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    state.active.set(0);
    state.roles.set(1);
    let mut scratch = Scratch::new(&artifact);
    scratch.ctx.last_end_offset = 42;
    let (state_before, ctx_before) = (state.clone(), scratch.ctx.clone());
    let mut log = ReportLog::default();

    let outcome =
        evaluate_streaming_eod(&artifact, 6, b"abcdef", &mut state, &mut scratch, &mut backend, &mut log).unwrap();
    assert_eq!(outcome, EodOutcome::BeyondMaxWidth);
    assert!(log.reports().is_empty());
    assert_eq!(state, state_before);
    assert_eq!(scratch.ctx, ctx_before);
    assert_eq!(scratch.stats, EodStats::default());
    assert_eq!(backend.counters, SimCounters::default());

    // 恰好等于上界时正常执行
    let outcome =
        evaluate_streaming_eod(&artifact, 5, b"abcde", &mut state, &mut scratch, &mut backend, &mut log).unwrap();
    assert_eq!(outcome, EodOutcome::Completed);
    assert_eq!(pairs(&log), vec![(5, 1), (5, 3)]);
}

#[test]
fn block_beyond_bound_is_an_error() {
    let artifact = EngineArtifact::builder(1, 1, 1).max_bi_anchored_width(Some(5)).build().unwrap();
    let mut backend = SimBackend::builder(1).build().unwrap();
    let mut state = StreamState::new(&artifact);
    let mut log = ReportLog::default();
    let (res, _) = block(&artifact, &mut backend, &mut state, b"abcdef", &mut log);
    assert_eq!(res.unwrap_err(), EodError::OffsetBeyondBound { offset: 6, bound: 5 });
}

#[test]
fn missing_eod_check_is_rejected() {
    let artifact = EngineArtifact::builder(1, 1, 1).requires_eod_check(false).build().unwrap();
    let mut backend = SimBackend::builder(1).build().unwrap();
    let mut state = StreamState::new(&artifact);
    let mut scratch = Scratch::new(&artifact);
    let mut log = ReportLog::default();
    let err = evaluate_streaming_eod(&artifact, 1, b"a", &mut state, &mut scratch, &mut backend, &mut log).unwrap_err();
    assert_eq!(err, EodError::MissingEodCheck);
    let (res, _) = block(&artifact, &mut backend, &mut state, b"a", &mut log);
    assert_eq!(res.unwrap_err(), EodError::MissingEodCheck);
}

#[test]
fn mismatched_state_is_rejected() {
    let artifact = EngineArtifact::builder(4, 2, 4).build().unwrap();
    let other = EngineArtifact::builder(8, 2, 8).build().unwrap();
    let mut backend = SimBackend::builder(4).build().unwrap();
    let mut state = StreamState::new(&other);
    let mut log = ReportLog::default();
    let (res, _) = block(&artifact, &mut backend, &mut state, b"a", &mut log);
    assert!(matches!(res.unwrap_err(), EodError::StateMismatch { .. }));
}

#[test]
fn streaming_expands_with_last_history_byte() {
    let artifact = EngineArtifact::builder(1, 1, 1).eod_engines(&[0]).build().unwrap();
    let mut engine = SimEngine::accepting(&[5]);
    engine.expand_key = Some(b'z');
    let backend = SimBackend::builder(1).engine(0, engine).build().unwrap();

    for (history, expected) in [(&b"abz"[..], vec![(100, 5)]), (&b"aby"[..], vec![]), (&b""[..], vec![])] {
        let mut backend = backend.clone();
        let mut state = StreamState::new(&artifact);
        state.active.set(0);
        let mut scratch = Scratch::new(&artifact);
        let mut log = ReportLog::default();
        let outcome =
            evaluate_streaming_eod(&artifact, 100, history, &mut state, &mut scratch, &mut backend, &mut log).unwrap();
        assert_eq!(outcome, EodOutcome::NoEodLogic);
        assert_eq!(pairs(&log), expected, "history {history:?}");
        assert_eq!(backend.counters.expansions, 1);
    }
}

#[test]
fn block_mode_never_expands_state() {
    let artifact = EngineArtifact::builder(1, 1, 1).eod_engines(&[0]).build().unwrap();
    let mut backend = SimBackend::builder(1).engine(0, SimEngine::accepting(&[5])).build().unwrap();
    let mut state = StreamState::new(&artifact);
    state.active.set(0);
    let mut log = ReportLog::default();
    let (res, _) = block(&artifact, &mut backend, &mut state, b"abc", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::NoEodLogic);
    assert_eq!(pairs(&log), vec![(3, 5)]);
    assert_eq!(backend.counters.expansions, 0);
}

#[test]
fn second_iterator_run_only_sees_roles_from_anchored_scan() {
    let artifact = EngineArtifact::builder(1, 2, 1)
        .anchored_scanner(1, 16)
        .eod_iter_program(ProgramRef(2))
        .build()
        .unwrap();
    let mut backend = SimBackend::builder(1)
        .program(ProgramRef(2), vec![ProgramStep::when_role(10, 0), ProgramStep::when_role(11, 1)])
        .literal(b"x", u64::MAX, LiteralAction::Role(1))
        .literal(b"ax", u64::MAX, LiteralAction::Delay(50))
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    state.roles.set(0);
    let mut log = ReportLog::default();

    let (res, scratch) = block(&artifact, &mut backend, &mut state, b"aax", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::Completed);
    assert_eq!(pairs(&log), vec![(3, 10), (3, 50), (3, 11)]);
    assert_eq!(scratch.stats.anchored_scans, 1);
    assert_eq!(scratch.ctx.filled_delayed_slots, 0);
    assert_eq!(state.roles.iter().collect::<Vec<_>>(), vec![1]);
}

#[test]
fn suffix_engine_triggered_by_anchored_scan_reports_once() {
    let artifact = EngineArtifact::builder(2, 1, 2)
        .anchored_scanner(1, 16)
        .eod_engines(&[0])
        .build()
        .unwrap();
    let mut backend = SimBackend::builder(2)
        .literal(b"end", u64::MAX, LiteralAction::Activate(1))
        .engine(0, SimEngine::accepting(&[7]))
        .engine(1, SimEngine::accepting(&[42]))
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    state.active.set(0);
    let mut log = ReportLog::default();

    let (res, scratch) = block(&artifact, &mut backend, &mut state, b"the end", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::Completed);
    // 引擎 0 只在第一阶段收尾，清除标记后不会作为后缀再次报告
    assert_eq!(pairs(&log), vec![(7, 7), (7, 42)]);
    assert_eq!(scratch.stats.suffixes_run, 1);
    assert_eq!(backend.counters.queue_execs, 1);
    assert!(scratch.queue_activity.is_set(1));
    assert_eq!(state.active.iter().collect::<Vec<_>>(), vec![1]);
}

#[test]
fn dead_suffix_engine_is_not_checked() {
    let artifact = EngineArtifact::builder(2, 1, 2).anchored_scanner(1, 16).build().unwrap();
    let mut engine = SimEngine::accepting(&[42]);
    engine.dies_on_end = true;
    let mut backend = SimBackend::builder(2)
        .literal(b"end", u64::MAX, LiteralAction::Activate(1))
        .engine(1, engine)
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    let mut log = ReportLog::default();

    let (res, _) = block(&artifact, &mut backend, &mut state, b"the end", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::Completed);
    assert!(log.reports().is_empty());
    assert_eq!(backend.counters.queue_execs, 1);
    assert_eq!(backend.counters.final_checks, 0);
}

#[test]
fn streaming_scan_maps_history_matches_to_stream_offsets() {
    let artifact = EngineArtifact::builder(1, 1, 1).anchored_scanner(3, 4).build().unwrap();
    let mut backend = SimBackend::builder(1)
        .literal(b"xend", u64::MAX, LiteralAction::Report(1))
        .literal(b"xxend", u64::MAX, LiteralAction::Report(2))
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    let mut scratch = Scratch::new(&artifact);
    let mut log = ReportLog::default();

    let outcome =
        evaluate_streaming_eod(&artifact, 1000, b"xxxxxend", &mut state, &mut scratch, &mut backend, &mut log).unwrap();
    assert_eq!(outcome, EodOutcome::Completed);
    // 只扫描末尾 4 字节，较长的字面量落在扫描区之外
    assert_eq!(pairs(&log), vec![(1000, 1)]);
    assert_eq!(scratch.ctx.last_end_offset, 1000);
}

#[test]
fn block_prep_flushes_last_byte_history() {
    let artifact = EngineArtifact::builder(1, 2, 1)
        .last_byte_history(&[1])
        .eod_iter_program(ProgramRef(2))
        .build()
        .unwrap();
    let mut backend = SimBackend::builder(1)
        .program(ProgramRef(2), vec![ProgramStep::when_role(20, 1), ProgramStep::when_role(21, 0)])
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    state.roles.set(0);
    state.roles.set(1);
    let mut log = ReportLog::default();

    let (res, scratch) = block(&artifact, &mut backend, &mut state, b"hello", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::Completed);
    assert_eq!(pairs(&log), vec![(5, 21)]);
    assert_eq!(scratch.ctx.last_end_offset, 5);
}

#[test]
fn rerun_with_restored_state_is_identical() {
    let artifact = EngineArtifact::builder(2, 2, 2)
        .anchored_scanner(1, 16)
        .eod_program(ProgramRef(1))
        .eod_iter_program(ProgramRef(2))
        .eod_engines(&[0, 1])
        .build()
        .unwrap();
    let backend = SimBackend::builder(2)
        .program(ProgramRef(1), vec![ProgramStep::report(1)])
        .program(ProgramRef(2), vec![ProgramStep::when_role(2, 0), ProgramStep::when_role(3, 1)])
        .literal(b"ab", u64::MAX, LiteralAction::Role(1))
        .literal(b"b", u64::MAX, LiteralAction::Activate(1))
        .engine(0, SimEngine::accepting(&[4]))
        .engine(1, SimEngine::accepting(&[5]))
        .build()
        .unwrap();
    let mut initial = StreamState::new(&artifact);
    initial.active.set(0);
    initial.roles.set(0);

    let run = || {
        let mut state = initial.clone();
        let mut backend = backend.clone();
        let mut log = ReportLog::default();
        let (res, _) = block(&artifact, &mut backend, &mut state, b"xab", &mut log);
        assert_eq!(res.unwrap(), EodOutcome::Completed);
        log.into_reports()
    };
    let first = run();
    assert_eq!(
        first.iter().map(|r| (r.offset, r.id)).collect::<Vec<_>>(),
        vec![(3, 1), (3, 4), (3, 2), (3, 3), (3, 5)]
    );
    assert_eq!(first, run());
}

#[test]
fn som_reports_carry_start_offset() {
    let artifact = EngineArtifact::builder(1, 1, 1).eod_program(ProgramRef(1)).build().unwrap();
    let mut backend = SimBackend::builder(1)
        .program(ProgramRef(1), vec![ProgramStep { report: 9, when_role: None, som_distance: Some(4) }])
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    let mut log = ReportLog::default();
    let (res, _) = block(&artifact, &mut backend, &mut state, b"abcdef", &mut log);
    // 没有迭代程序和扫描器，但无条件程序仍然运行
    assert_eq!(res.unwrap(), EodOutcome::NoEodLogic);
    assert_eq!(log.reports()[0].from, Some(2));
    assert_eq!(log.reports()[0].offset, 6);
}

#[test]
fn halt_in_anchored_scan_skips_later_steps() {
    let artifact = EngineArtifact::builder(2, 1, 2)
        .anchored_scanner(1, 16)
        .eod_iter_program(ProgramRef(2))
        .build()
        .unwrap();
    let mut backend = SimBackend::builder(2)
        .program(ProgramRef(2), vec![ProgramStep::when_role(9, 0)])
        .literal(b"z", u64::MAX, LiteralAction::Role(0))
        .literal(b"yz", u64::MAX, LiteralAction::Report(5))
        .literal(b"xyz", u64::MAX, LiteralAction::Activate(1))
        .engine(1, SimEngine::accepting(&[6]))
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    let mut log = ReportLog::new(Some(1));

    let (res, scratch) = block(&artifact, &mut backend, &mut state, b"xyz", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::Halted);
    assert_eq!(pairs(&log), vec![(3, 5)]);
    // 只有第一次迭代程序运行过；扫描中断于 Activate 之前
    assert_eq!(backend.counters.programs_run, 1);
    assert_eq!(backend.counters.queue_execs, 0);
    assert_eq!(backend.counters.final_checks, 0);
    assert_eq!(scratch.stats.anchored_scans, 1);
    assert!(state.active.is_empty());
    assert!(scratch.can_stop_matching());
}

#[test]
fn halt_in_delayed_flush_skips_later_steps() {
    let artifact = EngineArtifact::builder(2, 1, 2)
        .anchored_scanner(1, 16)
        .eod_iter_program(ProgramRef(2))
        .build()
        .unwrap();
    let mut backend = SimBackend::builder(2)
        .program(ProgramRef(2), vec![ProgramStep::when_role(9, 0)])
        .literal(b"ab", u64::MAX, LiteralAction::Delay(7))
        .literal(b"b", u64::MAX, LiteralAction::Delay(8))
        .literal(b"xab", u64::MAX, LiteralAction::Activate(1))
        .engine(1, SimEngine::accepting(&[6]))
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    let mut log = ReportLog::new(Some(1));

    let (res, scratch) = block(&artifact, &mut backend, &mut state, b"xab", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::Halted);
    assert_eq!(pairs(&log), vec![(3, 7)]);
    assert_eq!(backend.counters.programs_run, 1);
    // 后缀引擎已被触发，但没有执行
    assert!(state.active.is_set(1));
    assert_eq!(backend.counters.queue_execs, 0);
    assert_eq!(backend.counters.final_checks, 0);
    assert_eq!(scratch.stats.suffixes_run, 0);
}

#[test]
fn halt_in_second_iterator_run_skips_suffixes() {
    let artifact = EngineArtifact::builder(2, 2, 2)
        .anchored_scanner(1, 16)
        .eod_iter_program(ProgramRef(2))
        .build()
        .unwrap();
    let mut backend = SimBackend::builder(2)
        .program(ProgramRef(2), vec![ProgramStep::when_role(10, 0), ProgramStep::when_role(11, 1)])
        .literal(b"x", u64::MAX, LiteralAction::Role(0))
        .literal(b"ax", u64::MAX, LiteralAction::Role(1))
        .literal(b"aax", u64::MAX, LiteralAction::Activate(1))
        .engine(1, SimEngine::accepting(&[6]))
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    let mut log = ReportLog::new(Some(1));

    let (res, scratch) = block(&artifact, &mut backend, &mut state, b"aax", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::Halted);
    assert_eq!(pairs(&log), vec![(3, 10)]);
    assert_eq!(backend.counters.programs_run, 2);
    assert_eq!(backend.counters.queue_execs, 0);
    assert_eq!(backend.counters.final_checks, 0);
    assert_eq!(scratch.stats.suffixes_run, 0);
}

#[test]
fn halt_in_suffix_check_skips_remaining_engines() {
    let artifact = EngineArtifact::builder(2, 1, 2).anchored_scanner(1, 16).build().unwrap();
    let mut backend = SimBackend::builder(2)
        .literal(b"c", u64::MAX, LiteralAction::Activate(0))
        .literal(b"bc", u64::MAX, LiteralAction::Activate(1))
        .engine(0, SimEngine::accepting(&[20, 21]))
        .engine(1, SimEngine::accepting(&[30]))
        .build()
        .unwrap();
    let mut state = StreamState::new(&artifact);
    let mut log = ReportLog::new(Some(1));

    let (res, mut scratch) = block(&artifact, &mut backend, &mut state, b"abc", &mut log);
    assert_eq!(res.unwrap(), EodOutcome::Halted);
    assert_eq!(pairs(&log), vec![(3, 20)]);
    // 引擎 0 收尾时停止，引擎 1 的队列没有执行
    assert_eq!(backend.counters.queue_execs, 1);
    assert_eq!(backend.counters.final_checks, 1);
    assert_eq!(scratch.stats.suffixes_run, 1);
    assert!(scratch.can_stop_matching());

    let err = evaluate_block_eod(&artifact, 3, b"abc", &mut state, &mut scratch, &mut backend, &mut log).unwrap_err();
    assert_eq!(err, EodError::StreamTerminated);
}
