//! An in-memory unreliable link for exercising pairs of connections: packets are dropped,
//!  duplicated, delayed and reordered at random, with a fixed seed for reproducibility.

use std::time::Duration;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use crate::connection::Connection;

pub struct LossyLink {
    rng: StdRng,
    loss: f64,
    duplication: f64,
    /// probability for a packet in flight to be held back for another tick
    delay: f64,
    in_flight: Vec<Bytes>,
}

impl LossyLink {
    pub fn new(seed: u64, loss: f64, duplication: f64, delay: f64) -> LossyLink {
        LossyLink {
            rng: StdRng::seed_from_u64(seed),
            loss,
            duplication,
            delay,
            in_flight: Vec::new(),
        }
    }

    pub fn send(&mut self, packet: Bytes) {
        if self.rng.random_bool(self.loss) {
            return;
        }
        if self.rng.random_bool(self.duplication) {
            self.in_flight.push(packet.clone());
        }
        self.in_flight.push(packet);
    }

    /// the packets arriving in this tick, in random order
    pub fn receive(&mut self) -> Vec<Bytes> {
        let (mut arriving, delayed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|_| !self.rng.random_bool(self.delay));
        self.in_flight = delayed;
        arriving.shuffle(&mut self.rng);
        arriving
    }
}

/// Two connections exchanging one packet in each direction per tick
pub struct Simulation {
    pub a: Connection,
    pub b: Connection,
    a_to_b: LossyLink,
    b_to_a: LossyLink,
    tick_duration: Duration,
}

impl Simulation {
    pub fn new(a: Connection, b: Connection, a_to_b: LossyLink, b_to_a: LossyLink, tick_duration: Duration) -> Simulation {
        Simulation { a, b, a_to_b, b_to_a, tick_duration }
    }

    pub fn tick(&mut self) {
        self.a.advance_time(self.tick_duration);
        self.b.advance_time(self.tick_duration);

        if let Some(packet) = self.a.write_packet_data() {
            self.a_to_b.send(packet);
        }
        if let Some(packet) = self.b.write_packet_data() {
            self.b_to_a.send(packet);
        }

        for packet in self.a_to_b.receive() {
            self.b.read_packet_data(&packet);
        }
        for packet in self.b_to_a.receive() {
            self.a.read_packet_data(&packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::config::ConnectionConfig;
    use crate::connection::{ConnectionCounter, ConnectionError};
    use crate::sequence::SequenceNumber;

    const TICK: Duration = Duration::from_millis(10);

    fn payload(index: usize, len: usize) -> Bytes {
        (0..len).map(|i| (index * 31 + i) as u8).collect::<Vec<u8>>().into()
    }

    /// Sends `num_messages` messages from `a` to `b` over a lossy link, checking that all of them
    ///  arrive exactly once and in order.
    fn run(config: ConnectionConfig, seed: u64, loss: f64, num_messages: usize, mut message_len: impl FnMut(&mut StdRng) -> usize) -> Simulation {
        let mut sim = Simulation::new(
            Connection::new(config.clone()).unwrap(),
            Connection::new(config).unwrap(),
            LossyLink::new(seed, loss, 0.1, 0.2),
            LossyLink::new(seed + 1, loss, 0.1, 0.2),
            TICK,
        );
        let mut rng = StdRng::seed_from_u64(seed + 2);

        let mut sent = Vec::new();
        let mut num_received = 0;
        let mut next_id = SequenceNumber::ZERO;

        for _ in 0..100_000 {
            while sent.len() < num_messages {
                let len = message_len(&mut rng);
                if !sim.a.can_send_message(len) {
                    break;
                }
                let data = payload(sent.len(), len);
                sim.a.send_message(data.clone()).unwrap();
                sent.push(data);
            }

            sim.tick();

            while let Some(message) = sim.b.receive_message() {
                assert_eq!(message.id, next_id, "messages must be delivered in order");
                assert_eq!(message.payload, sent[num_received]);
                next_id = next_id.next();
                num_received += 1;
            }
            if num_received == num_messages {
                break;
            }
        }

        assert_eq!(num_received, num_messages);
        assert_eq!(sim.a.error(), ConnectionError::None);
        assert_eq!(sim.b.error(), ConnectionError::None);
        sim
    }

    #[rstest]
    #[case::reliable(1, 0.0)]
    #[case::some_loss(2, 0.1)]
    #[case::heavy_loss(3, 0.5)]
    fn test_in_order_delivery(#[case] seed: u64, #[case] loss: f64) {
        let sim = run(ConnectionConfig::default(), seed, loss, 2_000, |rng| rng.random_range(0..=200));
        assert!(sim.a.counter(ConnectionCounter::PacketsAcked) > 0);
    }

    #[rstest]
    #[case::reliable(4, 0.0)]
    #[case::lossy(5, 0.2)]
    fn test_blocks_between_messages(#[case] seed: u64, #[case] loss: f64) {
        let config = ConnectionConfig {
            max_block_size: 20_000,
            ..Default::default()
        };
        run(config, seed, loss, 300, |rng| {
            if rng.random_bool(0.05) {
                rng.random_range(1_025..=20_000)
            }
            else {
                rng.random_range(0..=1_024)
            }
        });
    }

    #[test]
    fn test_message_ids_wrap_around() {
        let config = ConnectionConfig {
            message_send_queue_size: 256,
            message_receive_queue_size: 256,
            ..Default::default()
        };
        run(config, 6, 0.1, 70_000, |_| 4);
    }

    #[test]
    fn test_small_receive_queue() {
        let config = ConnectionConfig {
            message_receive_queue_size: 8,
            ..Default::default()
        };
        run(config, 7, 0.2, 500, |rng| rng.random_range(1..=50));
    }
}
