use coresight_debug::core::RegisterError;
use coresight_debug::{
    ComponentType, CoreError, CoreStatus, DebugConfig, Error, FakeAccessPort, FakeCortexM,
    FakeProbe, HaltReason, MatcherRegistry, PollConfig, Session,
};
use pretty_assertions::assert_eq;

fn stm32g4(core: FakeCortexM) -> Session<FakeProbe> {
    let mut probe = FakeProbe::new();
    probe.add_access_port(FakeAccessPort::stm32g4().with_core(core));

    let config = DebugConfig {
        poll: PollConfig {
            halt_timeout_ms: 20,
            register_timeout_ms: 20,
            reset_timeout_ms: 50,
            poll_interval_ms: 1,
        },
        ..Default::default()
    };

    Session::attach(probe, &MatcherRegistry::with_builtin(), config).unwrap()
}

fn fake_core(session: &mut Session<FakeProbe>) -> &mut FakeCortexM {
    session.probe().access_port_mut(0).core_mut().unwrap()
}

#[test]
fn halt_and_read_registers() {
    let mut session = stm32g4(FakeCortexM::new());
    fake_core(&mut session).set_register(13, 0x2000_8000);
    fake_core(&mut session).set_register(15, 0x0800_0420);

    let mut core = session.core(0).unwrap();
    core.halt().unwrap();

    let registers = core.registers();
    let pc = core.read_core_register(registers.program_counter()).unwrap();
    let sp = core.read_core_register(registers.stack_pointer()).unwrap();

    assert_eq!(pc, 0x0800_0420);
    assert_eq!(sp, 0x2000_8000);
    assert_eq!(core.status().unwrap(), CoreStatus::Halted(HaltReason::Request));
}

#[test]
fn fpu_registers_are_accessible_on_cortex_m4() {
    let mut session = stm32g4(FakeCortexM::new());
    fake_core(&mut session).set_register(64, 0x3F80_0000);

    let mut core = session.core(0).unwrap();
    core.halt().unwrap();

    let s0 = core.registers().by_name("s0").unwrap();
    assert_eq!(core.read_core_register(s0).unwrap(), 0x3F80_0000);

    core.write_core_register(s0, 0x4000_0000).unwrap();
    drop(core);

    assert_eq!(fake_core(&mut session).register(64), 0x4000_0000);
}

#[test]
fn halt_state_survives_between_handles() {
    let mut session = stm32g4(FakeCortexM::new());

    session.core(0).unwrap().halt().unwrap();

    let core = session.core(0).unwrap();
    assert!(core.is_halted());

    let cpu = session.cores()[0];
    let state = session.components().get(cpu).unwrap().core_state().unwrap();
    assert!(state.halted);
}

#[test]
fn reset_halt_stops_at_the_reset_vector() {
    let mut session = stm32g4(
        FakeCortexM::new()
            .with_link_drops_on_reset(2)
            .with_reset_latency(1),
    );

    let mut core = session.core(0).unwrap();
    core.resume().unwrap();
    core.reset_halt().unwrap();

    let pc = core.registers().program_counter();
    assert_eq!(core.read_core_register(pc).unwrap(), 0x0800_0190);
    drop(core);

    let fake = fake_core(&mut session);
    assert_eq!(fake.resets(), 1);
    assert!(fake.is_halted());
}

#[test]
fn unresponsive_core_reports_a_timeout() {
    let mut session = stm32g4(FakeCortexM::new().unresponsive());

    let result = session.core(0).unwrap().halt();

    assert!(matches!(result, Err(CoreError::Timeout(_))));
}

#[test]
fn dwt_registers_through_the_session() {
    let mut session = stm32g4(FakeCortexM::new());
    session
        .probe()
        .access_port_mut(0)
        .write_word(0xE000_1000, 0x4000_0000);

    let cpu = session.cores()[0];
    let dwt = session.components().find_components_by_type(cpu, ComponentType::Dwt)[0];

    let mut registers = session.component_registers(dwt).unwrap();
    assert_eq!(registers.map().name, "DWT");
    assert_eq!(registers.read_field("CTRL", "NUMCOMP").unwrap(), 4);

    registers.write_field("CTRL", "CYCCNTENA", 1).unwrap();
    assert!(matches!(
        registers.write_field("CTRL", "NUMCOMP", 0x10),
        Err(RegisterError::ValueTooWide { .. })
    ));
    drop(registers);

    assert_eq!(session.probe().access_port(0).read_word(0xE000_1000), 0x4000_0001);
}

#[test]
fn scb_cpuid_through_the_session() {
    let mut session = stm32g4(FakeCortexM::new());
    let cpu = session.cores()[0];
    let scb = session.components().find_components_by_type(cpu, ComponentType::Scb)[0];

    let mut registers = session.component_registers(scb).unwrap();

    assert_eq!(registers.read_field("CPUID", "PARTNO").unwrap(), 0xC24);
    assert_eq!(registers.read_field("CPUID", "IMPLEMENTER").unwrap(), 0x41);
}

#[test]
fn missing_core_is_an_error() {
    let mut probe = FakeProbe::new();
    probe.add_access_port(FakeAccessPort::ahb3());
    let mut session =
        Session::attach(probe, &MatcherRegistry::with_builtin(), DebugConfig::default()).unwrap();

    assert!(matches!(session.core(0), Err(Error::CoreNotFound(0))));
}
