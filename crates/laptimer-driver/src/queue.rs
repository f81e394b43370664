//! 定容环形队列
//!
//! 容量在编译期确定，入队/出队不分配内存。用于存储层的待写队列与
//! 协议层的待发送帧队列。

/// 容量为 `N` 的 FIFO 环形队列
///
/// `head` 指向下一次写入的位置，`tail` 指向队首；两者相等时由 `full`
/// 区分“空”与“满”。
pub struct Queue<T, const N: usize> {
    data: [Option<T>; N],
    head: usize,
    tail: usize,
    full: bool,
}

impl<T, const N: usize> Queue<T, N> {
    pub fn new() -> Self {
        const { assert!(N > 0, "queue capacity must be non-zero") };
        Self {
            data: std::array::from_fn(|_| None),
            head: 0,
            tail: 0,
            full: false,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.head == self.tail
    }

    /// 队首元素（下一个出队的元素）
    pub fn first(&self) -> Option<&T> {
        self.data[self.tail].as_ref()
    }

    pub fn first_mut(&mut self) -> Option<&mut T> {
        self.data[self.tail].as_mut()
    }

    /// 最近入队的元素
    pub fn last(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        let index = if self.head == 0 { N - 1 } else { self.head - 1 };
        self.data[index].as_ref()
    }

    /// 入队；队列已满时原样返回元素，队列状态不变
    pub fn push(&mut self, value: T) -> Result<(), T> {
        if self.full {
            return Err(value);
        }
        self.data[self.head] = Some(value);
        self.head = (self.head + 1) % N;
        self.full = self.head == self.tail;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.data[self.tail].take();
        self.tail = (self.tail + 1) % N;
        self.full = false;
        value
    }

    pub fn size(&self) -> usize {
        if self.full {
            N
        } else if self.head >= self.tail {
            self.head - self.tail
        } else {
            N - self.tail + self.head
        }
    }

    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }

    /// 从队首到队尾遍历
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.size()).filter_map(move |offset| self.data[(self.tail + offset) % N].as_ref())
    }
}

impl<T, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug, const N: usize> std::fmt::Debug for Queue<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
