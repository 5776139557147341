use std::collections::VecDeque;

/// Every item that shares one priority value, in arrival order.
#[derive(Debug)]
struct SubQueue<T> {
    priority: i32,
    items: VecDeque<T>,
}

/// Min-heap of FIFO queues. A flat binary heap cannot keep equal priorities
/// in arrival order, so each heap node is a queue holding every item of one
/// priority. Heap work is logarithmic in the number of distinct priorities.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: Vec<SubQueue<T>>,
    len: usize,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> PriorityQueue<T> {
        PriorityQueue {
            heap: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn enqueue(&mut self, priority: i32, item: T) {
        self.len += 1;
        if let Some(queue) = self.heap.iter_mut().find(|queue| queue.priority == priority) {
            queue.items.push_back(item);
            return;
        }

        self.heap.push(SubQueue {
            priority,
            items: VecDeque::from([item]),
        });
        self.bubble_up(self.heap.len() - 1);
    }

    pub fn dequeue(&mut self) -> Option<T> {
        let root = self.heap.first_mut()?;
        if root.items.len() > 1 {
            self.len -= 1;
            return root.items.pop_front();
        }

        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let mut queue = self.heap.pop()?;
        if !self.heap.is_empty() {
            self.bubble_down(0);
        }
        self.len -= 1;
        queue.items.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.first().and_then(|queue| queue.items.front())
    }

    /// Items with their priorities, in the order `dequeue` would return them.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &T)> + '_ {
        let mut queues: Vec<&SubQueue<T>> = self.heap.iter().collect();
        queues.sort_by_key(|queue| queue.priority);
        queues
            .into_iter()
            .flat_map(|queue| queue.items.iter().map(move |item| (queue.priority, item)))
    }

    /// Empties the queue, returning items in dequeue order.
    pub fn drain(&mut self) -> Vec<(i32, T)> {
        let mut queues = std::mem::take(&mut self.heap);
        self.len = 0;
        queues.sort_by_key(|queue| queue.priority);
        queues
            .into_iter()
            .flat_map(|queue| {
                let priority = queue.priority;
                queue.items.into_iter().map(move |item| (priority, item))
            })
            .collect()
    }

    /// Keeps only the items `keep` accepts, without disturbing their order.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        for (priority, item) in self.drain() {
            if keep(&item) {
                self.enqueue(priority, item);
            }
        }
    }

    fn bubble_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[parent].priority <= self.heap[index].priority {
                break;
            }
            self.heap.swap(parent, index);
            index = parent;
        }
    }

    fn bubble_down(&mut self, mut index: usize) {
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < self.heap.len() && self.heap[left].priority < self.heap[smallest].priority {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].priority < self.heap[smallest].priority {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.heap.swap(index, smallest);
            index = smallest;
        }
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        PriorityQueue::new()
    }
}
