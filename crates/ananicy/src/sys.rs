#![allow(unsafe_code)]
//! Priority syscalls.
//!
//! rustix covers `setpriority(2)`; `ioprio_get(2)`, `ioprio_set(2)` and
//! `sched_setscheduler(2)` go through libc.

use std::io;

use ananicy_common::{IoClass, IoLevel, IoPriority, Nice, RtPrio, SchedPolicy};
use rustix::process::Pid;

const IOPRIO_WHO_PROCESS: libc::c_int = 1;
const IOPRIO_CLASS_SHIFT: u32 = 13;
const IOPRIO_PRIO_MASK: u32 = (1 << IOPRIO_CLASS_SHIFT) - 1;

fn raw_pid(tid: u32) -> io::Result<libc::pid_t> {
    match libc::pid_t::try_from(tid) {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(io::Error::from(io::ErrorKind::InvalidInput)),
    }
}

/// Set the niceness of a single thread.
pub fn set_nice(tid: u32, nice: Nice) -> io::Result<()> {
    let pid = Pid::from_raw(raw_pid(tid)?).ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
    rustix::process::setpriority_process(Some(pid), i32::from(nice.get()))?;
    Ok(())
}

/// Read the I/O priority of a thread.
pub fn ioprio_get(tid: u32) -> io::Result<IoPriority> {
    let pid = raw_pid(tid)?;
    // SAFETY: ioprio_get takes two integers and touches no memory.
    let ret = unsafe { libc::syscall(libc::SYS_ioprio_get, IOPRIO_WHO_PROCESS, pid) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    let value = u32::try_from(ret).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;
    let class = IoClass::from_code(value >> IOPRIO_CLASS_SHIFT)
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidData))?;
    let level = IoLevel::new(i64::from(value & IOPRIO_PRIO_MASK)).ok();
    Ok(IoPriority::new(class, level))
}

/// Set the I/O priority of a thread.
pub fn ioprio_set(tid: u32, class: IoClass, level: Option<IoLevel>) -> io::Result<()> {
    let pid = raw_pid(tid)?;
    let data = level.map_or(0, |level| u32::from(level.get()));
    let value = libc::c_int::try_from((class.code() << IOPRIO_CLASS_SHIFT) | data)
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    // SAFETY: ioprio_set takes three integers and touches no memory.
    let ret = unsafe { libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, pid, value) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Set the scheduling policy of a thread.
pub fn sched_setscheduler(tid: u32, policy: SchedPolicy, rtprio: Option<RtPrio>) -> io::Result<()> {
    let pid = raw_pid(tid)?;
    // SAFETY: sched_param is plain old data; all-zero is a valid value.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = rtprio.map_or(0, |prio| libc::c_int::from(prio.get()));
    // SAFETY: param lives for the duration of the call.
    let ret = unsafe { libc::sched_setscheduler(pid, policy.code(), &param) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
