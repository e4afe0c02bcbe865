use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flexlink_engine::{Engine, EngineConfig, EngineError, SimConfig, SimTarget};
use flexlink_transport::{Transport, TransportError};

fn open_sim(sim_config: SimConfig, config: EngineConfig) -> (Arc<SimTarget>, Engine) {
    let sim = Arc::new(SimTarget::new(sim_config));
    let engine = Engine::with_transport(sim.clone(), config).expect("engine should open");
    (sim, engine)
}

fn pattern(count: usize) -> Vec<u32> {
    (0..count as u32)
        .map(|i| i.wrapping_mul(0x9E37_79B9) ^ 0xA5A5_0000)
        .collect()
}

#[test]
fn round_trip_every_width() {
    let (_sim, engine) = open_sim(SimConfig::default(), EngineConfig::default());

    for count in [0usize, 1, 2, 7, 300] {
        let words = pattern(count);
        engine.write_words(0x2000_0000, &words).unwrap();
        let mut back = vec![0u32; count];
        engine.read_words(0x2000_0000, &mut back).unwrap();
        assert_eq!(back, words, "words, count {count}");

        let halves: Vec<u16> = words.iter().map(|w| *w as u16).collect();
        engine.write_halves(0x2001_0002, &halves).unwrap();
        let back: Vec<u16> = engine.read_vec(0x2001_0002, count).unwrap();
        assert_eq!(back, halves, "halves, count {count}");

        let bytes: Vec<u8> = words.iter().map(|w| (*w >> 8) as u8).collect();
        engine.write_bytes(0x2002_0001, &bytes).unwrap();
        let mut back = vec![0u8; count];
        engine.read_bytes(0x2002_0001, &mut back).unwrap();
        assert_eq!(back, bytes, "bytes, count {count}");
    }
}

#[test]
fn narrow_writes_land_in_the_right_lanes() {
    let (sim, engine) = open_sim(SimConfig::default(), EngineConfig::default());
    engine.write_bytes(0x100, &[0x44, 0x33, 0x22, 0x11]).unwrap();
    assert_eq!(sim.peek_word(0x100), 0x1122_3344);

    engine.write_halves(0x106, &[0xBEEF]).unwrap();
    assert_eq!(sim.peek_word(0x104), 0xBEEF_0000);
    assert_eq!(engine.reg_read(0x104).unwrap(), 0xBEEF_0000);
}

#[test]
fn zero_count_is_a_no_op() {
    let (sim, engine) = open_sim(SimConfig::default(), EngineConfig::default());
    engine.write_words(0x100, &[]).unwrap();
    engine.read_words(0x100, &mut []).unwrap();
    engine.read_bytes(0x100, &mut []).unwrap();

    assert_eq!(sim.write_calls(), 0);
    assert_eq!(engine.stats().bytes_sent, 0);
}

#[test]
fn single_element_is_one_full_frame() {
    let (sim, engine) = open_sim(SimConfig::default(), EngineConfig::default());
    engine.reg_write(0x2000_0000, 0xCAFE_F00D).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.transport_writes, 1);
    assert_eq!(stats.bytes_sent, 9);
    assert_eq!(stats.master_frames, 1);
    assert_eq!(sim.master_requests(), 1);
    assert_eq!(engine.reg_read(0x2000_0000).unwrap(), 0xCAFE_F00D);
}

#[test]
fn pipelining_matches_single_transactions() {
    let config = EngineConfig {
        chunk_size: 64,
        ..EngineConfig::default()
    };
    let (_sim, engine) = open_sim(SimConfig::default(), config);

    let words = pattern(500);
    engine.write_words(0x4000_0000, &words).unwrap();

    let batched: Vec<u32> = engine.read_vec(0x4000_0000, words.len()).unwrap();
    let single: Vec<u32> = (0..words.len())
        .map(|i| engine.reg_read(0x4000_0000 + 4 * i as u32).unwrap())
        .collect();
    assert_eq!(batched, single);
    assert_eq!(batched, words);
}

#[test]
fn chunk_bound_sets_physical_write_count() {
    let config = EngineConfig {
        chunk_size: 180,
        ..EngineConfig::default()
    };
    let (sim, engine) = open_sim(SimConfig::default(), config);
    assert_eq!(engine.chunk_bound(), 180);

    let words = pattern(1000);
    let mut expected = vec![0u32; 1000];
    for (i, word) in words.iter().enumerate() {
        sim.poke_word(0x1000 + 4 * i as u32, *word);
        expected[i] = *word;
    }

    // One 5-byte full read plus 999 one-byte auto-increment reads.
    let encoded = 5 + 999;
    let mut batched = vec![0u32; 1000];
    engine.read_words(0x1000, &mut batched).unwrap();
    assert_eq!(batched, expected);
    assert_eq!(sim.write_calls(), (encoded as u64).div_ceil(180));
    assert_eq!(engine.stats().transport_writes, 6);

    let single: Vec<u32> = (0..1000)
        .map(|i| engine.reg_read(0x1000 + 4 * i as u32).unwrap())
        .collect();
    assert_eq!(batched, single);
}

#[test]
fn transport_write_hint_caps_the_chunk() {
    let sim_config = SimConfig {
        hints: flexlink_transport::ChunkHints {
            read: Some(64),
            write: Some(32),
        },
        ..SimConfig::default()
    };
    let (sim, engine) = open_sim(sim_config, EngineConfig::default());
    assert_eq!(engine.chunk_bound(), 32);

    engine.write_words(0, &pattern(100)).unwrap();
    // 9 + 99 * 5 bytes in 32-byte batches of whole frames.
    assert!(sim.write_calls() >= (504u64).div_ceil(32));
}

#[test]
fn tiny_chunk_bound_is_rejected() {
    let sim = Arc::new(SimTarget::default());
    let config = EngineConfig {
        chunk_size: 4,
        ..EngineConfig::default()
    };
    let err = Engine::with_transport(sim, config).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn partial_io_is_transparent() {
    let sim_config = SimConfig {
        max_write: Some(7),
        max_read: Some(3),
        ..SimConfig::default()
    };
    let config = EngineConfig {
        chunk_size: 100,
        ..EngineConfig::default()
    };
    let (_sim, engine) = open_sim(sim_config, config);

    let words = pattern(400);
    engine.write_words(0x8000, &words).unwrap();
    let back: Vec<u32> = engine.read_vec(0x8000, words.len()).unwrap();
    assert_eq!(back, words);

    let stats = engine.stats();
    assert!(stats.transport_writes >= stats.bytes_sent.div_ceil(7));
}

#[test]
fn bus_fault_keeps_earlier_elements_and_the_link() {
    let config = EngineConfig {
        chunk_size: 16,
        ..EngineConfig::default()
    };
    let (sim, engine) = open_sim(SimConfig::default(), config);
    for i in 0..8u32 {
        sim.poke_word(0x3000_0000 + 4 * i, 0x100 + i);
    }
    sim.add_fault(0x3000_0010..=0x3000_0013);

    let mut out = vec![0u32; 100];
    let err = engine.read_words(0x3000_0000, &mut out).unwrap_err();
    match err {
        EngineError::BusFault { index, address } => {
            assert_eq!(index, 4);
            assert_eq!(address, 0x3000_0010);
        }
        other => panic!("expected bus fault, got {other:?}"),
    }
    assert!(!err.is_fatal());
    assert_eq!(&out[..4], &[0x100, 0x101, 0x102, 0x103]);

    // Responses in flight were drained; the next call lines up.
    assert!(engine.is_open());
    assert_eq!(engine.reg_read(0x3000_0014).unwrap(), 0x105);

    let err = engine
        .write_words(0x3000_0008, &[1, 2, 3, 4])
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::BusFault {
            index: 2,
            address: 0x3000_0010
        }
    ));
    assert_eq!(engine.reg_read(0x3000_000C).unwrap(), 2);
}

#[test]
fn hardware_id_is_reported() {
    let sim_config = SimConfig {
        hw_version: 7,
        ..SimConfig::default()
    };
    let (_sim, engine) = open_sim(sim_config, EngineConfig::default());
    let id = engine.hardware_id().unwrap();
    assert!(id.is_valid());
    assert_eq!(id.version(), 7);
}

#[test]
fn open_sim_by_device_id() {
    let engine = Engine::open("sim").expect("sim device should open");
    assert_eq!(engine.transport_name(), "sim");
    assert!(engine.hardware_id().unwrap().is_valid());
}

#[test]
fn close_is_idempotent_and_final() {
    let (_sim, engine) = open_sim(SimConfig::default(), EngineConfig::default());
    engine.reg_write(0x10, 1).unwrap();
    engine.close();
    engine.close();

    assert!(!engine.is_open());
    assert!(matches!(engine.reg_read(0x10), Err(EngineError::Closed(_))));
    assert!(matches!(engine.send(&[0x80]), Err(EngineError::Closed(_))));
}

#[test]
fn raw_master_requests_need_send_resp() {
    let (sim, engine) = open_sim(SimConfig::default(), EngineConfig::default());
    sim.poke_word(0x100, 0xAAAA_AAAA);
    sim.poke_word(0x200, 0xBBBB_BBBB);

    // Word read of 0x100.
    let err = engine.send(&[0xB2, 0, 0, 1, 0]).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)), "unexpected {err:?}");
    assert_eq!(sim.master_requests(), 0);
    assert!(engine.is_open());

    assert_eq!(engine.reg_read(0x200).unwrap(), 0xBBBB_BBBB);
    assert_eq!(engine.reg_read(0x100).unwrap(), 0xAAAA_AAAA);
}

#[test]
fn send_resp_consumes_its_responses() {
    let (sim, engine) = open_sim(SimConfig::default(), EngineConfig::default());
    sim.poke_word(0x100, 0xAAAA_AAAA);
    sim.poke_word(0x104, 0x1234_5678);
    sim.poke_word(0x200, 0xBBBB_BBBB);

    // Word read of 0x100, then an auto-increment word read.
    let responses = engine.send_resp(&[0xB2, 0, 0, 1, 0, 0x86]).unwrap();
    let wire: Vec<Vec<u8>> = responses.iter().map(|frame| frame.to_vec()).collect();
    assert_eq!(
        wire,
        vec![
            vec![0xB0, 0xAA, 0xAA, 0xAA, 0xAA],
            vec![0xB0, 0x12, 0x34, 0x56, 0x78],
        ]
    );

    assert_eq!(engine.reg_read(0x200).unwrap(), 0xBBBB_BBBB);
    assert_eq!(engine.reg_read(0x200).unwrap(), 0xBBBB_BBBB);

    assert!(engine.send_resp(&[]).unwrap().is_empty());
    assert!(matches!(
        engine.send_resp(&[0xB2, 0, 0]),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn send_resp_returns_bus_faults_as_frames() {
    let (sim, engine) = open_sim(SimConfig::default(), EngineConfig::default());
    sim.add_fault(0x300..=0x303);

    let responses = engine.send_resp(&[0xB2, 0, 0, 3, 0]).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].command, 0x81);
    assert!(responses[0].payload.is_empty());
    assert!(engine.is_open());
    assert_eq!(engine.reg_read(0x400).unwrap(), 0);
}

#[test]
fn send_injects_slave_replies() {
    let (sim, engine) = open_sim(SimConfig::default(), EngineConfig::default());
    sim.poke_word(0x200, 0xBBBB_BBBB);

    engine.send(&[0x30, 0x11, 0x22, 0x33, 0x44, 0x00]).unwrap();
    assert_eq!(
        sim.wait_for_replies(2, Duration::from_secs(2)),
        vec![vec![0x30, 0x11, 0x22, 0x33, 0x44], vec![0x00]]
    );
    assert_eq!(sim.master_requests(), 0);
    assert_eq!(engine.reg_read(0x200).unwrap(), 0xBBBB_BBBB);
}

#[test]
fn vanished_target_invalidates_the_engine() {
    let (sim, engine) = open_sim(SimConfig::default(), EngineConfig::default());
    sim.close();

    let err = engine.reg_read(0x10).unwrap_err();
    assert!(err.is_fatal(), "unexpected {err:?}");
    assert!(!engine.is_open());
    assert!(matches!(engine.reg_read(0x10), Err(EngineError::Closed(_))));
}

/// Accepts writes and never answers.
#[derive(Debug, Default)]
struct Mute;

impl Transport for Mute {
    fn read(&self, _buf: &mut [u8]) -> flexlink_transport::Result<usize> {
        std::thread::sleep(Duration::from_millis(1));
        Ok(0)
    }

    fn write(&self, buf: &[u8]) -> flexlink_transport::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&self) -> flexlink_transport::Result<()> {
        Ok(())
    }

    fn close(&self) {}

    fn name(&self) -> &'static str {
        "mute"
    }
}

#[test]
fn silent_target_times_out() {
    let config = EngineConfig {
        response_timeout: Some(Duration::from_millis(50)),
        ..EngineConfig::default()
    };
    let engine = Engine::with_transport(Arc::new(Mute), config).unwrap();

    let err = engine.reg_read(0x10).unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
    assert!(engine.failure().is_some());
    assert!(matches!(engine.reg_read(0x10), Err(EngineError::Closed(_))));
}

/// Acknowledges every write call with a bare status byte, whatever was asked.
#[derive(Debug, Default)]
struct AckEverything {
    pending: Mutex<VecDeque<u8>>,
}

impl Transport for AckEverything {
    fn read(&self, buf: &mut [u8]) -> flexlink_transport::Result<usize> {
        let mut pending = self.pending.lock().unwrap();
        let n = buf.len().min(pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = pending.pop_front().unwrap();
        }
        if n == 0 {
            drop(pending);
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> flexlink_transport::Result<usize> {
        self.pending.lock().unwrap().push_back(0x80);
        Ok(buf.len())
    }

    fn flush(&self) -> flexlink_transport::Result<()> {
        Ok(())
    }

    fn close(&self) {}

    fn name(&self) -> &'static str {
        "ack-everything"
    }
}

#[test]
fn short_read_response_is_a_protocol_error() {
    let engine =
        Engine::with_transport(Arc::new(AckEverything::default()), EngineConfig::default())
            .unwrap();

    // Writes are fine: a bare status is the right answer.
    engine.reg_write(0x10, 5).unwrap();

    let err = engine.reg_read(0x10).unwrap_err();
    assert!(matches!(err, EngineError::Protocol(_)));
    assert!(!engine.is_open());
}

/// Refuses every write.
#[derive(Debug, Default)]
struct Jammed;

impl Transport for Jammed {
    fn read(&self, _buf: &mut [u8]) -> flexlink_transport::Result<usize> {
        std::thread::sleep(Duration::from_millis(1));
        Ok(0)
    }

    fn write(&self, _buf: &[u8]) -> flexlink_transport::Result<usize> {
        Ok(0)
    }

    fn flush(&self) -> flexlink_transport::Result<()> {
        Ok(())
    }

    fn close(&self) {}

    fn name(&self) -> &'static str {
        "jammed"
    }
}

#[test]
fn stalled_writes_surface_as_transport_errors() {
    let config = EngineConfig {
        write_stall_timeout: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let engine = Engine::with_transport(Arc::new(Jammed), config).unwrap();
    let err = engine.reg_write(0, 1).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Transport(TransportError::WriteStalled { .. })
    ));
    assert!(!engine.is_open());
}

#[test]
fn concurrent_callers_do_not_mix_responses() {
    let config = EngineConfig {
        chunk_size: 32,
        ..EngineConfig::default()
    };
    let (_sim, engine) = open_sim(SimConfig::default(), config);
    let engine = Arc::new(engine);

    let workers: Vec<_> = (0..4u32)
        .map(|t| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let base = 0x5000_0000 + t * 0x1_0000;
                let words: Vec<u32> = (0..200).map(|i| (t << 24) | i).collect();
                for _ in 0..5 {
                    engine.write_words(base, &words).unwrap();
                    let back: Vec<u32> = engine.read_vec(base, words.len()).unwrap();
                    assert_eq!(back, words);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread should finish");
    }
}
