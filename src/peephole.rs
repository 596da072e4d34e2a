// File: src/peephole.rs
//
// A single pre-JIT bytecode rewrite: fuses the adjacent-pair array swap
// idiom bubble-sort bodies compile to into one `ArraySwapJit` opcode. Run
// once per function chunk right after compilation, before the chunk is
// ever interpreted or handed to the JIT screen.
//
// Grounded line-for-line on the original Go `peephole.go` /
// `opCodeMeta.go` / `codeReader.go` / `instruction.go` quartet — that
// pass survived in full in `original_source/` despite being reduced to one
// paragraph of prose upstream.

use crate::bytecode::{decode_at, Chunk, Instruction, Module, OpCode};

/// Runs the rewrite over every function in the module, in place.
pub fn optimize_module(module: &mut Module) {
    for info in module.functions.values_mut() {
        optimize_chunk(&mut info.chunk);
    }
}

fn optimize_chunk(chunk: &mut Chunk) {
    let code = &chunk.code;
    let mut matches = Vec::new();

    let mut ip = 0;
    while ip < code.len() {
        let Some(instr) = decode_at(code, ip) else { break };
        if let Some((new_code, span)) = match_bubble_sort_swap(code, ip) {
            matches.push(Replacement { old_start: ip, old_end: ip + span, new_code });
            ip += span;
            continue;
        }
        ip += instr.size;
    }

    if matches.is_empty() {
        return;
    }

    if let Some(rewritten) = rewrite(code, &matches) {
        chunk.code = rewritten;
    }
    // Dangling jump target inside a matched span: abandon the rewrite and
    // leave the chunk exactly as compiled.
}

struct Replacement {
    old_start: usize,
    old_end: usize,
    new_code: Vec<u8>,
}

/// Walks `code` once, substituting each `Replacement`'s span, and re-patches
/// every `Jump`/`JumpIfFalse` operand through the resulting old-ip → new-ip
/// map. Returns `None` if any jump's target can't be mapped — i.e. it
/// pointed inside a span that got replaced, at an offset other than that
/// span's own start — in which case the whole rewrite is abandoned.
fn rewrite(code: &[u8], matches: &[Replacement]) -> Option<Vec<u8>> {
    let old_to_new = build_offset_map(code, matches)?;

    let mut out = Vec::new();
    let mut match_idx = 0;
    let mut ip = 0;
    while ip < code.len() {
        if match_idx < matches.len() && ip == matches[match_idx].old_start {
            out.extend_from_slice(&matches[match_idx].new_code);
            ip = matches[match_idx].old_end;
            match_idx += 1;
            continue;
        }

        let instr = decode_at(code, ip)?;
        out.push(instr.op as u8);
        match instr.op {
            OpCode::Const | OpCode::Call => {
                out.push((instr.operand >> 8) as u8);
                out.push((instr.operand & 0xff) as u8);
            }
            OpCode::Jump | OpCode::JumpIfFalse => {
                let new_target = *old_to_new.get(&(instr.operand as usize))?;
                out.push((new_target >> 8) as u8);
                out.push((new_target & 0xff) as u8);
            }
            OpCode::LoadLocal | OpCode::StoreLocal => {
                out.push(instr.operand as u8);
            }
            _ => {}
        }
        ip += instr.size;
    }

    Some(out)
}

/// Maps every surviving old instruction boundary (and every replaced span's
/// start) to its offset in the rewritten stream.
fn build_offset_map(
    code: &[u8],
    matches: &[Replacement],
) -> Option<std::collections::HashMap<usize, u16>> {
    let mut map = std::collections::HashMap::with_capacity(code.len());
    let mut match_idx = 0;
    let mut ip = 0;
    let mut new_ip: usize = 0;
    while ip < code.len() {
        if match_idx < matches.len() && ip == matches[match_idx].old_start {
            map.insert(ip, new_ip as u16);
            new_ip += matches[match_idx].new_code.len();
            ip = matches[match_idx].old_end;
            match_idx += 1;
            continue;
        }

        let instr = decode_at(code, ip)?;
        map.insert(ip, new_ip as u16);
        new_ip += instr.size;
        ip += instr.size;
    }
    Some(map)
}

/// A cursor over a code slice that decodes one instruction at a time,
/// mirroring the original's `CodeReader`.
struct CodeReader<'a> {
    code: &'a [u8],
    ip: usize,
}

impl<'a> CodeReader<'a> {
    fn next_instruction(&mut self) -> Option<Instruction> {
        let instr = decode_at(self.code, self.ip)?;
        self.ip += instr.size;
        Some(instr)
    }

    fn expect_instruction(&mut self, op: OpCode) -> bool {
        matches!(self.next_instruction(), Some(instr) if instr.op == op)
    }

    fn expect_argument(&mut self, op: OpCode) -> Option<u32> {
        let instr = self.next_instruction()?;
        (instr.op == op).then_some(instr.operand)
    }
}

/// Matches, starting at `start`, the exact instruction sequence a compiled
/// `if a[j] > a[j+1] { tmp = a[j]; a[j] = a[j+1]; a[j+1] = tmp }` lowers to
/// (including the trailing unconditional `Jump` that bypasses the
/// not-taken branch). On success, returns the fused replacement bytes and
/// the number of bytes of original code they replace.
fn match_bubble_sort_swap(code: &[u8], start: usize) -> Option<(Vec<u8>, usize)> {
    let mut r = CodeReader { code, ip: start };

    // arr[j]
    let arr_slot = r.expect_argument(OpCode::LoadLocal)?;
    let j_slot = r.expect_argument(OpCode::LoadLocal)?;
    if !r.expect_instruction(OpCode::ArrayGet) {
        return None;
    }

    // arr[j+1]
    if r.expect_argument(OpCode::LoadLocal)? != arr_slot {
        return None;
    }
    if r.expect_argument(OpCode::LoadLocal)? != j_slot
        || !r.expect_instruction(OpCode::Const)
        || !r.expect_instruction(OpCode::Add)
        || !r.expect_instruction(OpCode::ArrayGet)
    {
        return None;
    }

    // arr[j] > arr[j+1]
    if !r.expect_instruction(OpCode::Gt) {
        return None;
    }
    let skip_ip = r.expect_argument(OpCode::JumpIfFalse)? as usize;
    if !r.expect_instruction(OpCode::Pop) {
        return None;
    }

    // tmp = arr[j]
    if r.expect_argument(OpCode::LoadLocal)? != arr_slot {
        return None;
    }
    if r.expect_argument(OpCode::LoadLocal)? != j_slot || !r.expect_instruction(OpCode::ArrayGet) {
        return None;
    }
    let tmp_slot = r.expect_argument(OpCode::StoreLocal)?;

    // arr[j] = arr[j+1]
    if r.expect_argument(OpCode::LoadLocal)? != arr_slot {
        return None;
    }
    if r.expect_argument(OpCode::LoadLocal)? != j_slot {
        return None;
    }
    if r.expect_argument(OpCode::LoadLocal)? != arr_slot {
        return None;
    }
    if r.expect_argument(OpCode::LoadLocal)? != j_slot
        || !r.expect_instruction(OpCode::Const)
        || !r.expect_instruction(OpCode::Add)
        || !r.expect_instruction(OpCode::ArrayGet)
        || !r.expect_instruction(OpCode::ArraySet)
    {
        return None;
    }

    // arr[j+1] = tmp
    if r.expect_argument(OpCode::LoadLocal)? != arr_slot {
        return None;
    }
    if r.expect_argument(OpCode::LoadLocal)? != j_slot
        || !r.expect_instruction(OpCode::Const)
        || !r.expect_instruction(OpCode::Add)
    {
        return None;
    }
    if r.expect_argument(OpCode::LoadLocal)? != tmp_slot || !r.expect_instruction(OpCode::ArraySet)
    {
        return None;
    }

    // Jump past the not-taken branch.
    let end_ip = r.expect_argument(OpCode::Jump)? as usize;

    if skip_ip >= code.len()
        || OpCode::from_byte(code[skip_ip]) != Some(OpCode::Pop)
        || end_ip != skip_ip + 1
    {
        return None;
    }

    let new_code = vec![
        OpCode::LoadLocal as u8,
        arr_slot as u8,
        OpCode::LoadLocal as u8,
        j_slot as u8,
        OpCode::ArraySwapJit as u8,
    ];

    let span = end_ip - start;
    if span == 0 {
        return None;
    }
    Some((new_code, span))
}
