//! Slot-indexed doubly-linked list.
//!
//! Stands in for an intrusive list: pushing returns a slot, and whoever owns
//! the element records that slot so it can later be unlinked in O(1). Slots
//! are only meaningful for the list that handed them out.

pub(crate) type Slot = usize;

struct Node<T> {
    value: Option<T>,
    prev: Option<Slot>,
    next: Option<Slot>,
}

pub(crate) struct SlotList<T> {
    nodes: Vec<Node<T>>,
    free: Vec<Slot>,
    front: Option<Slot>,
    back: Option<Slot>,
    len: usize,
}

impl<T> Default for SlotList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotList<T> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            front: None,
            back: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.front.is_none()
    }

    pub(crate) fn front(&self) -> Option<Slot> {
        self.front
    }

    pub(crate) fn next(&self, slot: Slot) -> Option<Slot> {
        self.node(slot).next
    }

    pub(crate) fn prev(&self, slot: Slot) -> Option<Slot> {
        self.node(slot).prev
    }

    pub(crate) fn get(&self, slot: Slot) -> &T {
        match &self.node(slot).value {
            Some(value) => value,
            None => panic!("slot {slot} is not linked"),
        }
    }

    pub(crate) fn push_back(&mut self, value: T) -> Slot {
        let slot = self.alloc(value);
        self.nodes[slot].prev = self.back;
        match self.back {
            Some(back) => self.nodes[back].next = Some(slot),
            None => self.front = Some(slot),
        }
        self.back = Some(slot);
        self.len += 1;
        slot
    }

    pub(crate) fn push_front(&mut self, value: T) -> Slot {
        let slot = self.alloc(value);
        self.nodes[slot].next = self.front;
        match self.front {
            Some(front) => self.nodes[front].prev = Some(slot),
            None => self.back = Some(slot),
        }
        self.front = Some(slot);
        self.len += 1;
        slot
    }

    pub(crate) fn remove(&mut self, slot: Slot) -> T {
        let node = &mut self.nodes[slot];
        let Some(value) = node.value.take() else {
            panic!("slot {slot} is not linked");
        };
        let (prev, next) = (node.prev.take(), node.next.take());
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.front = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.back = prev,
        }
        self.len -= 1;
        if self.len == 0 {
            // Nothing is linked, so no outstanding slot can refer to storage.
            self.nodes.clear();
            self.free.clear();
        } else {
            self.free.push(slot);
        }
        value
    }

    pub(crate) fn pop_front(&mut self) -> Option<T> {
        let slot = self.front?;
        Some(self.remove(slot))
    }

    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.front,
        }
    }

    fn node(&self, slot: Slot) -> &Node<T> {
        &self.nodes[slot]
    }

    fn alloc(&mut self, value: T) -> Slot {
        let node = Node {
            value: Some(value),
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }
}

pub(crate) struct Iter<'a, T> {
    list: &'a SlotList<T>,
    cursor: Option<Slot>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let slot = self.cursor?;
        self.cursor = self.list.next(slot);
        Some(self.list.get(slot))
    }
}
