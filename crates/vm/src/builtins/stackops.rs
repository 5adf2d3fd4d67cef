//! Stack shuffle words.
//!
//! All of them move whole units: a simple cell is one unit, a LIST span
//! (header through LINK) is one unit. That is what keeps list bookends
//! paired when programs shuffle lists around.

use tacit_core::ErrorKind;

use crate::vm::Vm;

pub fn dup(vm: &mut Vm) -> Result<(), ErrorKind> {
    let top = vm.pop_unit()?;
    vm.push_unit(&top)?;
    vm.push_unit(&top)
}

pub fn drop_top(vm: &mut Vm) -> Result<(), ErrorKind> {
    vm.pop_unit()?;
    Ok(())
}

pub fn swap(vm: &mut Vm) -> Result<(), ErrorKind> {
    let b = vm.pop_unit()?;
    let a = vm.pop_unit()?;
    vm.push_unit(&b)?;
    vm.push_unit(&a)
}

pub fn over(vm: &mut Vm) -> Result<(), ErrorKind> {
    let b = vm.pop_unit()?;
    let a = vm.pop_unit()?;
    vm.push_unit(&a)?;
    vm.push_unit(&b)?;
    vm.push_unit(&a)
}

pub fn rot(vm: &mut Vm) -> Result<(), ErrorKind> {
    let c = vm.pop_unit()?;
    let b = vm.pop_unit()?;
    let a = vm.pop_unit()?;
    vm.push_unit(&b)?;
    vm.push_unit(&c)?;
    vm.push_unit(&a)
}

pub fn nip(vm: &mut Vm) -> Result<(), ErrorKind> {
    let b = vm.pop_unit()?;
    vm.pop_unit()?;
    vm.push_unit(&b)
}

pub fn tuck(vm: &mut Vm) -> Result<(), ErrorKind> {
    let b = vm.pop_unit()?;
    let a = vm.pop_unit()?;
    vm.push_unit(&b)?;
    vm.push_unit(&a)?;
    vm.push_unit(&b)
}
