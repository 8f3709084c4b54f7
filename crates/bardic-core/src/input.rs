use bardic_ports::input::NotePressCallback;
use parking_lot::Mutex;
use rtrb::{Consumer, RingBuffer};
use std::sync::Arc;

/// Consumer side of the note-press queue, drained once per tick.
pub struct NotePressReceiver {
    consumer: Consumer<u8>,
}

impl NotePressReceiver {
    pub fn drain(&mut self) -> Vec<u8> {
        let mut pending = Vec::new();
        while let Ok(pitch) = self.consumer.pop() {
            pending.push(pitch);
        }
        pending
    }
}

/// Builds a callback that may be fired from any thread and the receiver that
/// hands those presses to the tick. Presses arriving while the queue is full
/// or contended are dropped.
pub fn note_press_channel(capacity: usize) -> (NotePressCallback, NotePressReceiver) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    let producer = Arc::new(Mutex::new(producer));
    let cb: NotePressCallback = Arc::new(move |pitch: u8| {
        if let Some(mut guard) = producer.try_lock() {
            let _ = guard.push(pitch);
        }
    });
    (cb, NotePressReceiver { consumer })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presses_cross_threads_in_order() {
        let (cb, mut rx) = note_press_channel(16);
        let sender = cb.clone();
        std::thread::spawn(move || {
            for pitch in [60, 0, 62] {
                sender(pitch);
            }
        })
        .join()
        .unwrap();
        cb(64);

        assert_eq!(rx.drain(), vec![60, 0, 62, 64]);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn full_queue_drops_newest() {
        let (cb, mut rx) = note_press_channel(2);
        for pitch in [60, 61, 62] {
            cb(pitch);
        }
        assert_eq!(rx.drain(), vec![60, 61]);
    }
}
