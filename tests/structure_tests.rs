use mt32synth::synth::params::CommonParam;
use mt32synth::synth::structure::{pair_position, pair_slot, MixType, Structure, STRUCTURE_COUNT};

#[test]
fn test_every_structure_has_pcm_flags_and_mix() {
    let expected: [(bool, bool, MixType); STRUCTURE_COUNT] = [
        (false, false, MixType::Mix),
        (false, false, MixType::RingMix),
        (true, false, MixType::Mix),
        (true, false, MixType::RingMix),
        (false, true, MixType::RingMix),
        (true, true, MixType::Mix),
        (true, true, MixType::RingMix),
        (false, false, MixType::Stereo),
        (true, true, MixType::Stereo),
        (false, false, MixType::Ring),
        (true, false, MixType::Ring),
        (false, true, MixType::Ring),
        (true, true, MixType::Ring),
    ];

    for (raw, (first_pcm, second_pcm, mix)) in expected.iter().enumerate() {
        let s = Structure::new(raw as u8);
        assert_eq!(s.number(), raw + 1);
        assert_eq!(s.is_pcm(0), *first_pcm, "structure {}", s.number());
        assert_eq!(s.is_pcm(1), *second_pcm, "structure {}", s.number());
        assert_eq!(s.mix_type(), *mix, "structure {}", s.number());
    }
}

#[test]
fn test_pcm_side_follows_hardware_numbering() {
    // 3: PCM + synth, 5: synth + PCM ring, 11: PCM ring synth, 12: synth ring PCM.
    assert!(Structure::new(2).is_pcm(0) && !Structure::new(2).is_pcm(1));
    assert!(!Structure::new(4).is_pcm(0) && Structure::new(4).is_pcm(1));
    assert!(Structure::new(10).is_pcm(0) && !Structure::new(10).is_pcm(1));
    assert!(!Structure::new(11).is_pcm(0) && Structure::new(11).is_pcm(1));
}

#[test]
fn test_out_of_range_structure_clamps() {
    assert_eq!(Structure::new(200), Structure::new(12));
}

#[test]
fn test_slots_pick_their_structure_byte() {
    let common = CommonParam {
        pstruct12: 3,
        pstruct34: 9,
        ..CommonParam::default()
    };
    assert_eq!(Structure::for_slot(&common, 0).number(), 4);
    assert_eq!(Structure::for_slot(&common, 1).number(), 4);
    assert_eq!(Structure::for_slot(&common, 2).number(), 10);
    assert_eq!(Structure::for_slot(&common, 3).number(), 10);
}

#[test]
fn test_pairs_are_zero_one_and_two_three() {
    assert_eq!(pair_slot(0), 1);
    assert_eq!(pair_slot(1), 0);
    assert_eq!(pair_slot(2), 3);
    assert_eq!(pair_slot(3), 2);
    assert_eq!(pair_position(2), 0);
    assert_eq!(pair_position(3), 1);
}

#[test]
fn test_ring_mix_types() {
    assert!(MixType::Ring.uses_ring());
    assert!(MixType::RingMix.uses_ring());
    assert!(!MixType::Mix.uses_ring());
    assert!(!MixType::Stereo.uses_ring());
}
