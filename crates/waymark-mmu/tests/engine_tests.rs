use waymark_iter::ListEnumerator;
use waymark_mmu::solver::BasicSolverContext;
use waymark_mmu::spec::{AddressId, BufferId};
use waymark_mmu::{
    engine::solve_batch_parallel, AccessPath, BufferAccessEvent, BufferEvent, BufferParams,
    DataType, HazardKind, IntegerField, MemoryAccess, MemoryAccessStructure, MemoryAccessType,
    MemoryAdapter, MemoryDependency, MemoryEngine, MemoryHazard, MmuAddressType, MmuExpression,
    MmuSubsystem, PreparationStep,
};

fn cache_subsystem() -> (MmuSubsystem, BufferId, AddressId) {
    let mut builder = MmuSubsystem::builder();
    let pa = builder.add_address(MmuAddressType::new("pa", 32)).unwrap();
    builder.set_physical_address(pa);

    let address = MmuAddressType::new("pa", 32);
    let field = |lo, hi| IntegerField::new(address.variable(), lo, hi);

    let cache = builder
        .add_buffer(BufferParams::new(
            "l1",
            4,
            256,
            pa,
            MmuExpression::field(field(14, 31)),
            MmuExpression::field(field(6, 13)),
            MmuExpression::field(field(0, 5)),
        ))
        .unwrap();

    (builder.build(), cache, pa)
}

fn load(buffer: BufferId, event: BufferAccessEvent) -> MemoryAccess {
    MemoryAccess::new(
        MemoryAccessType::load(DataType::WORD),
        AccessPath::new(vec![BufferEvent { buffer, event }]),
    )
}

/// A structure that cannot be solved: five same-set hits in a 4-way cache.
fn unsat_structure(cache: BufferId) -> MemoryAccessStructure {
    let accesses = (0..5)
        .map(|_| load(cache, BufferAccessEvent::Hit))
        .collect();
    let dependencies = (1..5)
        .map(|j| {
            (
                0,
                j,
                MemoryDependency::new(vec![MemoryHazard::buffer(HazardKind::IndexEqual, cache)]),
            )
        })
        .collect();
    MemoryAccessStructure::new(accesses, dependencies)
}

fn sat_structure(cache: BufferId) -> MemoryAccessStructure {
    MemoryAccessStructure::new(
        vec![
            load(cache, BufferAccessEvent::Hit),
            load(cache, BufferAccessEvent::Hit),
        ],
        vec![(
            0,
            1,
            MemoryDependency::new(vec![MemoryHazard::buffer(HazardKind::TagEqual, cache)]),
        )],
    )
}

#[test]
fn test_engine_skips_unsat_structures() {
    let (memory, cache, _) = cache_subsystem();

    let structures = ListEnumerator::new(vec![unsat_structure(cache), sat_structure(cache)]);
    let mut engine = MemoryEngine::new(&memory, structures, BasicSolverContext, None, 42);

    engine.init().unwrap();
    assert!(engine.has_value());

    // The first accepted solution comes from the second structure.
    let solution = engine.value().unwrap();
    assert_eq!(solution.size(), 2);

    engine.next().unwrap();
    assert!(!engine.has_value(), "exhaustion is silent");
}

#[test]
fn test_engine_yields_all_sat_structures() {
    let (memory, cache, _) = cache_subsystem();

    let structures = ListEnumerator::new(vec![
        sat_structure(cache),
        unsat_structure(cache),
        sat_structure(cache),
    ]);
    let mut engine = MemoryEngine::new(&memory, structures, BasicSolverContext, None, 42);

    let mut count = 0;
    engine.init().unwrap();
    while engine.has_value() {
        count += 1;
        engine.next().unwrap();
    }

    assert_eq!(count, 2);
}

#[test]
fn test_engine_empty_stream_is_silent() {
    let (memory, _, _) = cache_subsystem();

    let structures: ListEnumerator<MemoryAccessStructure> = ListEnumerator::new(vec![]);
    let mut engine = MemoryEngine::new(&memory, structures, BasicSolverContext, None, 42);

    engine.init().unwrap();
    assert!(!engine.has_value());
}

#[test]
fn test_adapter_renders_prologue_then_accesses() {
    let (memory, cache, pa) = cache_subsystem();

    // A single demanded hit forces one priming load in the prologue.
    let structure = MemoryAccessStructure::new(
        vec![load(cache, BufferAccessEvent::Hit)],
        vec![],
    );

    let structures = ListEnumerator::new(vec![structure.clone()]);
    let mut engine = MemoryEngine::new(&memory, structures, BasicSolverContext, None, 42);
    engine.init().unwrap();
    let solution = engine.take_value().unwrap();

    let adapter = MemoryAdapter::new(&memory);
    let program = adapter.adapt(&structure, &solution);

    assert_eq!(program.accesses.len(), 1);
    let touched: Vec<_> = program
        .preparation
        .iter()
        .filter(|step| matches!(step, PreparationStep::TouchAddress { .. }))
        .collect();
    assert_eq!(touched.len(), 1);

    let access = &program.accesses[0];
    assert!(access.addresses.contains_key(&pa));
}

#[test]
fn test_parallel_batch_matches_sequential_verdicts() {
    let (memory, cache, _) = cache_subsystem();

    let structures = vec![
        sat_structure(cache),
        unsat_structure(cache),
        sat_structure(cache),
    ];

    let results =
        solve_batch_parallel(&memory, &structures, || BasicSolverContext, None, 42);

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].as_ref().is_err_and(|e| e.is_unsat()));
    assert!(results[2].is_ok());
}
