// File: src/heap.rs
//
// The managed heap backing dynamically allocated arrays: an arena of
// generation-tagged slots standing in for the intrusive mark-and-sweep
// linked list described in the design notes ("arena-owned objects with
// stable handles, never a web of raw references"). `ObjRef` is the stable
// handle a `Value::Object` carries; the arena is the single owner of the
// payload it points at.

use crate::bytecode::Value;

/// A handle into `Heap::slots`. The generation guards against a freed-then
/// reused slot index being read through a stale handle — every allocation
/// into a slot bumps its generation, so a stale `ObjRef` simply fails
/// validity instead of aliasing an unrelated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRef {
    index: usize,
    generation: u32,
}

struct ArrayObject {
    mark: bool,
    items: Vec<Value>,
}

enum Slot {
    Occupied(ArrayObject),
    /// Threads the free list through dead slots, mirroring the source's
    /// intrusive `next` link but over indices instead of pointers.
    Free(Option<usize>),
}

/// Small constant threshold spec.md fixes as the collector's starting
/// point before any objects exist.
const INITIAL_THRESHOLD: u32 = 8;

pub struct Heap {
    slots: Vec<Slot>,
    generations: Vec<u32>,
    free_head: Option<usize>,
    num_objects: usize,
    threshold: u32,
}

/// A view of one active frame's root values, supplied by the VM's roots
/// registry. The collector scans exactly these locations and nothing else.
pub struct RootView<'a> {
    pub locals: &'a [Value],
    pub stack: &'a [Value],
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free_head: None,
            num_objects: 0,
            threshold: INITIAL_THRESHOLD,
        }
    }

    pub fn num_objects(&self) -> usize {
        self.num_objects
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Overrides the starting collection threshold, floored at
    /// `INITIAL_THRESHOLD` the same as a fresh heap. Only meaningful before
    /// any allocation — `collect` recomputes it from the live count after.
    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = std::cmp::max(INITIAL_THRESHOLD, threshold);
    }

    /// Allocates a fresh array of `len` copies of `zero`, running a
    /// collection first if this allocation would exceed `threshold`.
    pub fn allocate_array(&mut self, len: usize, zero: Value, roots: &[RootView<'_>]) -> ObjRef {
        if self.num_objects + 1 > self.threshold as usize {
            self.collect(roots);
        }

        let index = match self.free_head {
            Some(i) => {
                if let Slot::Free(next) = self.slots[i] {
                    self.free_head = next;
                } else {
                    unreachable!("free list pointed at an occupied slot");
                }
                i
            }
            None => {
                self.slots.push(Slot::Free(None));
                self.generations.push(0);
                self.slots.len() - 1
            }
        };

        self.generations[index] = self.generations[index].wrapping_add(1);
        self.slots[index] = Slot::Occupied(ArrayObject { mark: false, items: vec![zero; len] });
        self.num_objects += 1;

        ObjRef { index, generation: self.generations[index] }
    }

    fn object(&self, r: ObjRef) -> Option<&ArrayObject> {
        if self.generations.get(r.index).copied() != Some(r.generation) {
            return None;
        }
        match self.slots.get(r.index) {
            Some(Slot::Occupied(obj)) => Some(obj),
            _ => None,
        }
    }

    fn object_mut(&mut self, r: ObjRef) -> Option<&mut ArrayObject> {
        if self.generations.get(r.index).copied() != Some(r.generation) {
            return None;
        }
        match self.slots.get_mut(r.index) {
            Some(Slot::Occupied(obj)) => Some(obj),
            _ => None,
        }
    }

    pub fn len(&self, r: ObjRef) -> Option<usize> {
        self.object(r).map(|o| o.items.len())
    }

    pub fn get(&self, r: ObjRef, index: usize) -> Option<Value> {
        self.object(r).and_then(|o| o.items.get(index).cloned())
    }

    pub fn set(&mut self, r: ObjRef, index: usize, value: Value) -> Option<()> {
        let obj = self.object_mut(r)?;
        let slot = obj.items.get_mut(index)?;
        *slot = value;
        Some(())
    }

    /// `tmp = arr[index]; arr[index] = arr[index + 1]; arr[index + 1] = tmp`
    /// — the fused operation `ArraySwapJit` performs in one step.
    pub fn swap_adjacent(&mut self, r: ObjRef, index: usize) -> Option<()> {
        let obj = self.object_mut(r)?;
        if index + 1 >= obj.items.len() {
            return None;
        }
        obj.items.swap(index, index + 1);
        Some(())
    }

    /// Runs mark-and-sweep, scanning exactly the root locations `roots`
    /// names and nothing else, then recomputes `threshold` as
    /// `max(INITIAL_THRESHOLD, 2 * live_count)`.
    pub fn collect(&mut self, roots: &[RootView<'_>]) {
        self.mark(roots);
        self.sweep();
        self.threshold = std::cmp::max(INITIAL_THRESHOLD, 2 * self.num_objects as u32);
    }

    fn mark(&mut self, roots: &[RootView<'_>]) {
        for root in roots {
            for value in root.locals.iter() {
                self.mark_value(value);
            }
            for value in root.stack.iter() {
                self.mark_value(value);
            }
        }
    }

    fn mark_value(&mut self, value: &Value) {
        if let Value::Object(r) = value {
            self.mark_object(*r);
        }
    }

    /// Idempotent: marking an already-marked object is a no-op. Recurses
    /// into the array's own elements so nested arrays stay reachable.
    fn mark_object(&mut self, r: ObjRef) {
        let already_marked = match self.object(r) {
            Some(obj) => obj.mark,
            None => return,
        };
        if already_marked {
            return;
        }
        if let Some(obj) = self.object_mut(r) {
            obj.mark = true;
        }
        let children: Vec<Value> = self.object(r).map(|o| o.items.clone()).unwrap_or_default();
        for child in &children {
            self.mark_value(child);
        }
    }

    /// Single traversal: splice out every unmarked object onto the free
    /// list and clear the mark bit on every survivor.
    fn sweep(&mut self) {
        for i in 0..self.slots.len() {
            let unmarked = matches!(&self.slots[i], Slot::Occupied(obj) if !obj.mark);
            if unmarked {
                self.slots[i] = Slot::Free(self.free_head);
                self.free_head = Some(i);
                self.num_objects -= 1;
            } else if let Slot::Occupied(obj) = &mut self.slots[i] {
                obj.mark = false;
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_roots() -> Vec<RootView<'static>> {
        Vec::new()
    }

    #[test]
    fn allocate_then_sweep_with_no_roots_frees_it() {
        let mut heap = Heap::new();
        let r = heap.allocate_array(3, Value::Int(0), &no_roots());
        assert_eq!(heap.num_objects(), 1);
        heap.collect(&no_roots());
        assert_eq!(heap.num_objects(), 0);
        assert!(heap.get(r, 0).is_none());
    }

    #[test]
    fn rooted_array_survives_collection() {
        let mut heap = Heap::new();
        let r = heap.allocate_array(2, Value::Null, &no_roots());
        let locals = [Value::Object(r)];
        let roots = vec![RootView { locals: &locals, stack: &[] }];
        heap.collect(&roots);
        assert_eq!(heap.num_objects(), 1);
        assert_eq!(heap.get(r, 0), Some(Value::Null));
    }

    #[test]
    fn nested_array_is_marked_through_parent() {
        let mut heap = Heap::new();
        let inner = heap.allocate_array(1, Value::Int(7), &no_roots());
        let outer = heap.allocate_array(1, Value::Null, &no_roots());
        heap.set(outer, 0, Value::Object(inner)).unwrap();

        let locals = [Value::Object(outer)];
        let roots = vec![RootView { locals: &locals, stack: &[] }];
        heap.collect(&roots);
        assert_eq!(heap.num_objects(), 2);
    }

    #[test]
    fn threshold_grows_to_twice_live_count() {
        let mut heap = Heap::new();
        let mut handles = Vec::new();
        for _ in 0..20 {
            handles.push(heap.allocate_array(1, Value::Null, &no_roots()));
        }
        let locals: Vec<Value> = handles.iter().map(|h| Value::Object(*h)).collect();
        let roots = vec![RootView { locals: &locals, stack: &[] }];
        heap.collect(&roots);
        assert_eq!(heap.num_objects(), 20);
        assert_eq!(heap.threshold(), 40);
    }

    #[test]
    fn freed_slot_is_reused_with_bumped_generation() {
        let mut heap = Heap::new();
        let a = heap.allocate_array(1, Value::Null, &no_roots());
        heap.collect(&no_roots());
        let b = heap.allocate_array(1, Value::Null, &no_roots());
        assert!(heap.get(a, 0).is_none());
        assert!(heap.get(b, 0).is_some());
    }

    #[test]
    fn swap_adjacent_exchanges_values() {
        let mut heap = Heap::new();
        let r = heap.allocate_array(2, Value::Int(0), &no_roots());
        heap.set(r, 0, Value::Int(1)).unwrap();
        heap.set(r, 1, Value::Int(2)).unwrap();
        heap.swap_adjacent(r, 0).unwrap();
        assert_eq!(heap.get(r, 0), Some(Value::Int(2)));
        assert_eq!(heap.get(r, 1), Some(Value::Int(1)));
    }
}
