//! Integration tests exercising whole streams in software.
//!
//! A [`MockDma`](crate::io::mock::MockDma) on each side stands in for the
//! hardware. The core pattern is a software loopback from an output stream
//! into an input stream:
//!
//! ```text
//! dequeue() → write() → [out DMA target] → drain()
//!     → load() → [in DMA target] → on_transfer_complete() → read()
//! ```

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use crate::buffer::BufferPool;
    use crate::config::{Direction, Resolution, StreamConfig};
    use crate::hal::StreamSetup;
    use crate::io::double_buffer::{Completion, DoubleBuffer, StreamState};
    use crate::io::mock::MockDma;

    const SAMPLES: usize = 8;
    const BUFFERS: usize = 4;

    fn setup(direction: Direction) -> StreamSetup<'static> {
        StreamSetup {
            instance: 0,
            channels: &[0],
            resolution: Resolution::Bits12,
            sample_rate: 8_000,
            direction,
            master_clock: false,
        }
    }

    fn stream(direction: Direction, config: StreamConfig) -> DoubleBuffer<u16, MockDma> {
        let stream = DoubleBuffer::new(MockDma::new(), direction);
        stream.begin(&config, &setup(direction)).unwrap();
        stream
    }

    fn config() -> StreamConfig {
        StreamConfig::new(Resolution::Bits12, 8_000, SAMPLES, BUFFERS)
    }

    /// Every buffer of the pool is somewhere: free, ready, bound or held.
    fn accounted(pool: &BufferPool<u16>, stream: &DoubleBuffer<u16, MockDma>, held: usize) -> usize {
        pool.writable() + pool.readable() + stream.in_flight() + held
    }

    /// Fill the current input target with `value` and raise the interrupt.
    fn capture(stream: &DoubleBuffer<u16, MockDma>, value: u16) -> Completion {
        assert!(stream.with_dma(|dma| dma.fill(value)));
        stream.on_transfer_complete(u64::from(value))
    }

    // ---------------------------------------------------------------
    // Loopback through the peripheral front-ends
    // ---------------------------------------------------------------
    #[cfg(all(feature = "adc", feature = "dac"))]
    #[test]
    fn dac_to_adc_loopback() {
        use crate::io::{AdcPin, AdvancedAdc, AdvancedDac};
        use crate::registry::{AdcInstance, ChannelRegistry, DacChannel};

        const BLOCKS: u16 = 6;

        let dacs = ChannelRegistry::new();
        let adcs = ChannelRegistry::new();
        let dac = AdvancedDac::new(&dacs, MockDma::new(), DacChannel::Channel1);
        let adc = AdvancedAdc::new(&adcs, MockDma::new(), &[AdcPin::new(AdcInstance::Adc1, 4)]);
        dac.begin(Resolution::Bits12, 8_000, SAMPLES, BUFFERS).unwrap();
        adc.begin(Resolution::Bits12, 8_000, SAMPLES, BUFFERS).unwrap();

        let write_block = |block: u16| {
            let mut buf = dac.try_dequeue().unwrap().unwrap();
            for (i, s) in buf.iter_mut().enumerate() {
                *s = block * SAMPLES as u16 + i as u16;
            }
            dac.write(buf).unwrap();
        };

        write_block(0);
        write_block(1);
        assert_eq!(dac.state(), StreamState::Streaming);

        let mut next = 2;
        let mut received = Vec::new();
        let mut tick = 0;
        while dac.state() == StreamState::Streaming {
            if next < BLOCKS && dac.available() > 0 {
                write_block(next);
                next += 1;
            }

            // One transfer period: the DAC output is wired to the ADC input.
            let chunk = dac.stream().with_dma(|dma| {
                assert!(dma.drain());
                dma.sent[dma.sent.len() - SAMPLES..].to_vec()
            });
            assert!(adc.stream().with_dma(|dma| dma.load(&chunk)));
            tick += 1;
            dac.on_transfer_complete();
            assert_eq!(adc.on_transfer_complete(tick), Completion::Delivered);

            while let Some(buf) = adc.try_read().unwrap() {
                assert!(!buf.is_discontinuous());
                received.extend_from_slice(&buf[..]);
                adc.release(buf).unwrap();
            }
        }

        // The last block was still bound when the queue ran dry.
        let expected: Vec<u16> = (0..(BLOCKS - 1) * SAMPLES as u16).collect();
        assert_eq!(received, expected);
        assert_eq!(dac.stats().underruns, 1);
        assert_eq!(adc.stats().overruns, 0);
        assert_eq!(dac.available(), BUFFERS);
        assert_eq!(adc.stream().in_flight(), 2);
    }

    // ---------------------------------------------------------------
    // Round trip: 0..7 through a 4 x 8 pool on the output path
    // ---------------------------------------------------------------
    #[test]
    fn output_round_trip() {
        let out = stream(Direction::Output, config());

        let mut a = out.try_dequeue().unwrap().unwrap();
        for (i, s) in a.iter_mut().enumerate() {
            *s = i as u16;
        }
        out.write(a).unwrap();
        let mut b = out.try_dequeue().unwrap().unwrap();
        b.fill(0);
        out.write(b).unwrap();

        assert!(out.with_dma(|dma| dma.drain()));
        out.with_dma(|dma| assert_eq!(dma.sent, [0, 1, 2, 3, 4, 5, 6, 7]));
    }

    // ---------------------------------------------------------------
    // Conservation across a scripted input session
    // ---------------------------------------------------------------
    #[test]
    fn input_conservation() {
        let input = stream(Direction::Input, config());
        let pool = input.pool().unwrap();
        let mut held = Vec::new();

        assert_eq!(accounted(&pool, &input, held.len()), BUFFERS);

        for value in 1..=5 {
            capture(&input, value);
            assert_eq!(accounted(&pool, &input, held.len()), BUFFERS);
        }

        while let Some(buf) = input.try_read().unwrap() {
            held.push(buf);
            assert_eq!(accounted(&pool, &input, held.len()), BUFFERS);
        }
        assert_eq!(held.len(), 2);
        assert_ne!(held[0].index(), held[1].index());

        capture(&input, 6);
        assert_eq!(accounted(&pool, &input, held.len()), BUFFERS);

        let first = held.remove(0);
        input.release(first).unwrap();
        capture(&input, 7);
        assert_eq!(accounted(&pool, &input, held.len()), BUFFERS);

        input.clear();
        assert_eq!(pool.readable(), 0);
        assert_eq!(accounted(&pool, &input, held.len()), BUFFERS);

        input.stop();
        assert_eq!(input.in_flight(), 0);
        for buf in held.drain(..) {
            pool.release(buf).unwrap();
        }
        assert_eq!(pool.writable(), BUFFERS);
    }

    #[test]
    fn output_conservation() {
        let out = stream(Direction::Output, config());
        let pool = out.pool().unwrap();

        let mut held = Vec::new();
        while let Some(buf) = out.try_dequeue().unwrap() {
            held.push(buf);
        }
        assert_eq!(accounted(&pool, &out, held.len()), BUFFERS);

        while let Some(mut buf) = held.pop() {
            buf.fill(1);
            out.write(buf).unwrap();
            assert_eq!(accounted(&pool, &out, held.len()), BUFFERS);
        }
        assert_eq!(out.in_flight(), 2);

        for _ in 0..3 {
            out.with_dma(|dma| dma.drain());
            out.on_transfer_complete(0);
            assert_eq!(accounted(&pool, &out, 0), BUFFERS);
        }
        assert_eq!(out.state(), StreamState::Armed);
        assert_eq!(pool.writable(), BUFFERS);
    }

    #[test]
    fn dropped_buffers_are_conserved() {
        let input = stream(Direction::Input, config());
        let pool = input.pool().unwrap();

        assert_eq!(capture(&input, 1), Completion::Delivered);
        assert_eq!(capture(&input, 2), Completion::Delivered);
        let mut held = Vec::new();
        while let Some(buf) = input.try_read().unwrap() {
            held.push(buf);
        }
        assert_eq!(pool.writable(), 0);
        drop(held);
        assert_eq!(accounted(&pool, &input, 0), BUFFERS);
        assert_eq!(pool.writable(), 2);
        assert_eq!(capture(&input, 3), Completion::Delivered);

        let out = stream(Direction::Output, config());
        let out_pool = out.pool().unwrap();
        let mut held = Vec::new();
        while let Some(buf) = out.try_dequeue().unwrap() {
            held.push(buf);
        }
        held.truncate(2);
        assert_eq!(accounted(&out_pool, &out, held.len()), BUFFERS);
        while let Some(buf) = held.pop() {
            out.write(buf).unwrap();
        }
        assert_eq!(out.state(), StreamState::Streaming);
        assert_eq!(accounted(&out_pool, &out, 0), BUFFERS);
    }

    // ---------------------------------------------------------------
    // FIFO order via sequence tags
    // ---------------------------------------------------------------
    #[test]
    fn ready_queue_is_fifo() {
        let input = stream(Direction::Input, StreamConfig::new(Resolution::Bits12, 8_000, SAMPLES, 8));

        for value in 1..=6 {
            assert_eq!(capture(&input, value), Completion::Delivered);
        }

        let mut seen = Vec::new();
        while let Some(buf) = input.try_read().unwrap() {
            assert!(buf.iter().all(|&s| s == buf[0]));
            assert_eq!(buf.timestamp(), u64::from(buf[0]));
            seen.push(buf[0]);
            input.release(buf).unwrap();
        }
        assert_eq!(seen, [1, 2, 3, 4, 5, 6]);
    }

    // ---------------------------------------------------------------
    // Overrun: N + 2 completions with the consumer asleep
    // ---------------------------------------------------------------
    #[test]
    fn overrun_is_flagged() {
        let input = stream(Direction::Input, config());

        let results: Vec<Completion> = (1..=(BUFFERS as u16 + 2)).map(|v| capture(&input, v)).collect();
        assert_eq!(results.iter().filter(|&&c| c == Completion::Delivered).count(), BUFFERS - 2);
        assert_eq!(input.stats().overruns, 4);
        assert_eq!(input.stats().completions, BUFFERS as u32 + 2);

        // The consumer wakes up and keeps pace from here on.
        let mut flagged = Vec::new();
        for value in 7..=10 {
            while let Some(buf) = input.try_read().unwrap() {
                if buf.is_discontinuous() {
                    flagged.push(buf[0]);
                }
                input.release(buf).unwrap();
            }
            capture(&input, value);
        }
        assert!(!flagged.is_empty());
        // A flagged buffer carries fresh data, never the overwritten samples.
        assert!(flagged.iter().all(|&v| v >= 7));
    }

    // ---------------------------------------------------------------
    // Underrun: the transfer stops instead of replaying stale data
    // ---------------------------------------------------------------
    #[test]
    fn underrun_stops_transfer() {
        let out = stream(Direction::Output, config());
        for value in [10, 20] {
            let mut buf = out.try_dequeue().unwrap().unwrap();
            buf.fill(value);
            out.write(buf).unwrap();
        }
        assert!(out.is_streaming());

        assert!(out.with_dma(|dma| dma.drain()));
        assert_eq!(out.on_transfer_complete(0), Completion::Underrun);

        assert!(!out.is_streaming());
        assert_eq!(out.in_flight(), 0);
        out.with_dma(|dma| {
            assert!(!dma.running);
            assert!(!dma.drain());
            assert!(dma.sent.iter().all(|&s| s == 10));
        });

        // A late interrupt is harmless.
        assert_eq!(out.on_transfer_complete(0), Completion::Ignored);
    }

    // ---------------------------------------------------------------
    // Teardown right after begin
    // ---------------------------------------------------------------
    #[test]
    fn stop_right_after_begin() {
        for direction in [Direction::Input, Direction::Output] {
            let s = stream(direction, config());
            let pool = s.pool().unwrap();
            s.stop();

            assert_eq!(s.state(), StreamState::Idle);
            assert!(s.pool().is_none());
            assert_eq!(pool.writable(), BUFFERS);
            assert_eq!(alloc::sync::Arc::strong_count(&pool), 1);
            drop(pool);

            // The descriptor can be reused.
            s.begin(&config(), &setup(direction)).unwrap();
        }
    }

    #[test]
    fn held_buffer_outlives_stream() {
        let input = stream(Direction::Input, config());
        capture(&input, 42);
        let buf = input.try_read().unwrap().unwrap();
        drop(input);

        assert!(buf.iter().all(|&s| s == 42));
    }

    // ---------------------------------------------------------------
    // Interrupt and application on separate threads
    // ---------------------------------------------------------------
    #[test]
    fn concurrent_interrupt_and_reader() {
        extern crate std;
        const EVENTS: u16 = 2_000;

        let input = stream(Direction::Input, config());
        let delivered = std::sync::atomic::AtomicUsize::new(0);

        let mut values = Vec::new();
        std::thread::scope(|s| {
            s.spawn(|| {
                for value in 1..=EVENTS {
                    if capture(&input, value) == Completion::Delivered {
                        delivered.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                    std::thread::yield_now();
                }
            });

            loop {
                match input.try_read().unwrap() {
                    Some(buf) => {
                        assert!(buf.iter().all(|&v| v == buf[0]));
                        values.push(buf[0]);
                        input.release(buf).unwrap();
                    }
                    None if values.last() == Some(&EVENTS) => break,
                    None if input.stats().completions == u32::from(EVENTS) && input.available() == 0 => break,
                    None => core::hint::spin_loop(),
                }
            }
        });

        assert!(values.windows(2).all(|w| w[0] < w[1]));
        let stats = input.stats();
        assert_eq!(stats.completions, u32::from(EVENTS));
        let delivered = delivered.load(std::sync::atomic::Ordering::Relaxed);
        assert_eq!(delivered + stats.overruns as usize, EVENTS as usize);
        assert_eq!(values.len(), delivered);
    }
}
