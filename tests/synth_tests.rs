mod common;

use approx::assert_relative_eq;
use common::*;
use mt32synth::synth::params::{master_tune_hz, RHYTHM_PART};
use mt32synth::synth::prelude::MAX_SAMPLE_OUTPUT;
use mt32synth::synth::tables::{Tables, NOTE_COUNT};
use mt32synth::synth::{ControlChange, PartEvent, PolyState, Synth, SynthConfig};
use mt32synth::Error;

fn note_on(synth: &mut Synth, part: usize, key: u8) {
    synth.play_event(part, PartEvent::NoteOn { key, velocity: 100 });
}

fn note_off(synth: &mut Synth, part: usize, key: u8) {
    synth.play_event(part, PartEvent::NoteOff { key });
}

fn control(synth: &mut Synth, part: usize, cc: ControlChange) {
    synth.play_event(part, PartEvent::Control(cc));
}

fn assert_pairs_symmetric(synth: &Synth) {
    let partials = synth.partials();
    for i in 0..partials.len() {
        let Some(p) = partials.partial(i).filter(|p| p.is_active()) else {
            continue;
        };
        if let Some(j) = p.pair() {
            let other = partials.partial(j).unwrap();
            assert!(other.is_active(), "partial {i} pairs with inactive {j}");
            assert_eq!(other.pair(), Some(i), "pair {i} -> {j} is one-sided");
        }
    }
}

#[test]
fn test_tables_cover_every_note_for_any_rate_and_tune() {
    let bank = test_bank();
    for rate in [22050, 32000, 44100, 48000] {
        for tune in [0, 64, 127] {
            let tables = Tables::init(
                &bank.pcm.waves,
                bank.pcm.samples.len(),
                rate,
                master_tune_hz(tune),
            )
            .unwrap();
            for n in 0..NOTE_COUNT {
                let note = tables.note(n);
                assert!(note.div2 > 0, "note {n} at {rate} Hz");
                assert!(!note.saw().is_empty());
                assert!(note.wav_table.iter().all(|&d| d > 0));
            }
        }
    }
}

#[test]
fn test_program_zero_key_60_plays_then_releases() {
    let mut synth = open_synth(dry_config());
    synth.play_event(0, PartEvent::ProgramChange(0));
    note_on(&mut synth, 0, 60);

    let part = synth.part(0).unwrap();
    assert_eq!(part.current_instr(), "Sustain");
    assert_eq!(part.active_poly_count(), 1);
    assert!((1..=4).contains(&synth.active_partial_count()));

    let block = render_frames(&mut synth, MAX_SAMPLE_OUTPUT);
    assert!(peak(&block) > 100);
    let block = render_frames(&mut synth, MAX_SAMPLE_OUTPUT);
    assert!(peak(&block) > 100, "sustained note died early");

    note_off(&mut synth, 0, 60);
    assert!(render_until_idle(&mut synth, 64));
    assert_eq!(synth.part(0).unwrap().active_poly_count(), 0);
    let tail = render_frames(&mut synth, 1024);
    assert!(tail.iter().all(|&s| s == 0));
}

#[test]
fn test_note_cycles_do_not_leak_partials() {
    let mut synth = open_synth(dry_config());
    let pool = synth.partials().len();
    for round in 0..40u8 {
        let key = 40 + round % 24;
        note_on(&mut synth, 0, key);
        note_on(&mut synth, 1, key + 1);
        render_frames(&mut synth, 300);
        note_off(&mut synth, 0, key);
        // Repeated note-on on the same key reuses rather than stacks.
        note_on(&mut synth, 1, key + 1);
        note_off(&mut synth, 1, key + 1);
        render_frames(&mut synth, 300);
    }
    assert!(render_until_idle(&mut synth, 128));
    assert_eq!(synth.partials().free_partial_count(), pool);
    for part in synth.parts() {
        assert_eq!(part.active_poly_count(), 0, "{}", part.name());
    }
}

#[test]
fn test_pairs_stay_symmetric() {
    let mut synth = open_synth(dry_config());
    synth.play_event(0, PartEvent::ProgramChange(PROGRAM_RING));
    for (i, key) in [48u8, 55, 60, 64, 67].into_iter().enumerate() {
        note_on(&mut synth, 0, key);
        assert_pairs_symmetric(&synth);
        render_frames(&mut synth, 512);
        assert_pairs_symmetric(&synth);
        if i % 2 == 1 {
            note_off(&mut synth, 0, key);
        }
    }
    let out = render_frames(&mut synth, MAX_SAMPLE_OUTPUT);
    assert!(peak(&out) > 0);
    synth.play_event(0, PartEvent::Control(ControlChange::AllNotesOff));
    for _ in 0..64 {
        render_frames(&mut synth, 1024);
        assert_pairs_symmetric(&synth);
    }
}

#[test]
fn test_poly_stealing_keeps_part_within_capacity() {
    let config = SynthConfig {
        max_poly: 4,
        ..dry_config()
    };
    let mut synth = open_synth(config);
    for key in 60..66u8 {
        note_on(&mut synth, 0, key);
        render_frames(&mut synth, 64);
        let part = synth.part(0).unwrap();
        assert!(part.active_poly_count() <= 4);
        assert!(part
            .polys()
            .iter()
            .any(|p| p.key == key as u32 && p.state == PolyState::Playing));
    }
    let part = synth.part(0).unwrap();
    assert_eq!(part.active_poly_count(), 4);
    // The two oldest notes were the ones stolen.
    assert!(part.polys().iter().all(|p| p.key != 60 && p.key != 61));
    assert_eq!(synth.active_partial_count(), 4);
}

#[test]
fn test_released_poly_is_stolen_before_playing_ones() {
    let config = SynthConfig {
        max_poly: 2,
        ..dry_config()
    };
    let mut synth = open_synth(config);
    note_on(&mut synth, 0, 60);
    note_on(&mut synth, 0, 62);
    note_off(&mut synth, 0, 62);
    note_on(&mut synth, 0, 64);
    let keys: Vec<u32> = synth
        .part(0)
        .unwrap()
        .polys()
        .iter()
        .filter(|p| p.is_active())
        .map(|p| p.key)
        .collect();
    assert!(keys.contains(&60));
    assert!(keys.contains(&64));
}

#[test]
fn test_rendering_is_deterministic() {
    let run = || {
        let mut synth = open_synth(SynthConfig::default());
        let mut out = Vec::new();
        synth.play_msg(msg(0x91, 60, 100));
        synth.play_msg(msg(0x91, 67, 90));
        synth.play_msg(msg(0x99, KICK_KEY, 127));
        out.extend(render_frames(&mut synth, 3000));
        synth.play_msg(msg(0xE1, 0x00, 0x50));
        synth.play_msg(msg(0xB1, 1, 100));
        out.extend(render_frames(&mut synth, 5000));
        synth.play_msg(msg(0x81, 60, 0));
        out.extend(render_frames(&mut synth, 9000));
        out
    };
    let first = run();
    assert!(peak(&first) > 0);
    assert_eq!(first, run());
}

#[test]
fn test_rhythm_ignores_pan_bend_and_modulation() {
    let render_kick = |tweak: bool| {
        let mut synth = open_synth(dry_config());
        if tweak {
            control(&mut synth, RHYTHM_PART, ControlChange::Pan(0));
            synth.play_event(RHYTHM_PART, PartEvent::PitchBend(16383));
        }
        note_on(&mut synth, RHYTHM_PART, KICK_KEY);
        let mut out = render_frames(&mut synth, 2000);
        if tweak {
            control(&mut synth, RHYTHM_PART, ControlChange::Modulation(127));
            control(&mut synth, RHYTHM_PART, ControlChange::Pan(127));
            synth.play_event(RHYTHM_PART, PartEvent::PitchBend(0));
        }
        out.extend(render_frames(&mut synth, 4000));
        out
    };
    let plain = render_kick(false);
    assert!(peak(&plain) > 0);
    assert_eq!(plain, render_kick(true));
}

#[test]
fn test_rhythm_uses_drum_pan() {
    let mut synth = open_synth(dry_config());
    note_on(&mut synth, RHYTHM_PART, KICK_KEY);
    let out = render_frames(&mut synth, 2000);
    let left: i64 = out.iter().step_by(2).map(|&s| (s as i64).abs()).sum();
    let right: i64 = out.iter().skip(1).step_by(2).map(|&s| (s as i64).abs()).sum();
    // Panpot 3 leans left.
    assert!(left > right);
}

#[test]
fn test_rhythm_ignores_out_of_range_and_unmapped_keys() {
    let mut synth = open_synth(dry_config());
    for key in [0u8, 20, 23, 109, 127, 37, 60] {
        note_on(&mut synth, RHYTHM_PART, key);
    }
    assert_eq!(synth.active_partial_count(), 0);
    note_on(&mut synth, RHYTHM_PART, KICK_KEY);
    assert_eq!(synth.active_partial_count(), 1);
    let rhythm = synth.part(RHYTHM_PART).unwrap();
    assert_eq!(rhythm.polys().iter().find(|p| p.is_active()).unwrap().drum, Some(KICK_DRUM));
}

#[test]
fn test_timbre_change_mid_note_keeps_sounding_note() {
    let mut reference = open_synth(dry_config());
    let mut changed = open_synth(dry_config());
    for synth in [&mut reference, &mut changed] {
        note_on(synth, 0, 60);
        render_frames(synth, 2500);
    }
    changed.write_timbre(0, nosustain_timbre());
    assert_eq!(changed.part(0).unwrap().current_instr(), "Pluck");
    assert_eq!(reference.part(0).unwrap().current_instr(), "Sustain");

    let a = render_frames(&mut reference, MAX_SAMPLE_OUTPUT);
    let b = render_frames(&mut changed, MAX_SAMPLE_OUTPUT);
    assert!(peak(&b) > 100);
    assert_eq!(a, b);

    // New notes pick up the new timbre.
    note_on(&mut changed, 0, 72);
    let fresh = changed
        .partials()
        .iter()
        .filter(|p| p.is_active())
        .find(|p| p.key() == 72)
        .unwrap();
    assert!(!fresh.cache().sustain);
}

#[test]
fn test_program_change_mid_note_keeps_sounding_note() {
    let mut synth = open_synth(dry_config());
    note_on(&mut synth, 0, 60);
    render_frames(&mut synth, 1000);
    synth.play_event(0, PartEvent::ProgramChange(PROGRAM_NOSUSTAIN));
    // The sustained note outlives anything the new program would allow.
    for _ in 0..16 {
        render_frames(&mut synth, MAX_SAMPLE_OUTPUT);
    }
    assert_eq!(synth.active_partial_count(), 1);
    assert!(synth.partials().iter().any(|p| p.is_active() && p.cache().sustain));
}

#[test]
fn test_non_sustaining_timbre_decays_without_note_off() {
    let mut synth = open_synth(dry_config());
    synth.play_event(0, PartEvent::ProgramChange(PROGRAM_NOSUSTAIN));
    note_on(&mut synth, 0, 60);
    assert_eq!(synth.active_partial_count(), 1);
    assert!(render_until_idle(&mut synth, 64));
    assert_eq!(synth.part(0).unwrap().active_poly_count(), 0);
}

#[test]
fn test_hold_pedal_keeps_released_notes() {
    let mut synth = open_synth(dry_config());
    control(&mut synth, 0, ControlChange::HoldPedal(true));
    note_on(&mut synth, 0, 60);
    note_off(&mut synth, 0, 60);
    let poly_state = |s: &Synth| s.part(0).unwrap().polys().iter().find(|p| p.is_active()).map(|p| p.state);
    assert_eq!(poly_state(&synth), Some(PolyState::Held));
    for _ in 0..16 {
        render_frames(&mut synth, MAX_SAMPLE_OUTPUT);
    }
    assert_eq!(synth.active_partial_count(), 1);
    assert!(synth.partials().iter().any(|p| p.is_active() && p.is_pedal_held()));

    control(&mut synth, 0, ControlChange::HoldPedal(false));
    assert_eq!(poly_state(&synth), Some(PolyState::Releasing));
    assert!(render_until_idle(&mut synth, 64));
}

#[test]
fn test_all_sound_off_is_immediate_and_all_notes_off_releases() {
    let mut synth = open_synth(dry_config());
    note_on(&mut synth, 0, 60);
    note_on(&mut synth, 0, 64);
    render_frames(&mut synth, 256);
    control(&mut synth, 0, ControlChange::AllNotesOff);
    let part = synth.part(0).unwrap();
    assert_eq!(part.active_poly_count(), 2);
    assert!(part
        .polys()
        .iter()
        .filter(|p| p.is_active())
        .all(|p| p.state == PolyState::Releasing));

    control(&mut synth, 0, ControlChange::AllSoundOff);
    assert_eq!(synth.active_partial_count(), 0);
    assert_eq!(synth.part(0).unwrap().active_poly_count(), 0);
    assert!(render_frames(&mut synth, 256).iter().all(|&s| s == 0));
}

#[test]
fn test_volume_change_reaches_sounding_notes() {
    let mut synth = open_synth(dry_config());
    note_on(&mut synth, 0, 60);
    let loud = render_frames(&mut synth, 2000);
    assert!(peak(&loud) > 100);
    control(&mut synth, 0, ControlChange::Volume(0));
    assert!(render_frames(&mut synth, 1000).iter().all(|&s| s == 0));
    control(&mut synth, 0, ControlChange::Volume(127));
    control(&mut synth, 0, ControlChange::Expression(64));
    let half = render_frames(&mut synth, 2000);
    assert!(peak(&half) > 0 && peak(&half) < peak(&loud));
}

#[test]
fn test_bender_range_via_rpn() {
    let mut synth = open_synth(dry_config());
    control(&mut synth, 0, ControlChange::RpnMsb(0));
    control(&mut synth, 0, ControlChange::RpnLsb(0));
    control(&mut synth, 0, ControlChange::DataEntry(2));
    assert_eq!(synth.part(0).unwrap().bender_range(), 2);
    control(&mut synth, 0, ControlChange::DataEntry(99));
    assert_eq!(synth.part(0).unwrap().bender_range(), 24);
}

#[test]
fn test_play_msg_routes_by_channel_assignment() {
    let mut synth = open_synth(dry_config());
    synth.play_msg(msg(0x90, 60, 100));
    assert_eq!(synth.active_partial_count(), 0);
    synth.play_msg(msg(0x91, 60, 100));
    assert_eq!(synth.per_part_usage()[0], 1);
    synth.play_msg(msg(0x99, KICK_KEY, 100));
    assert_eq!(synth.per_part_usage()[RHYTHM_PART], 1);

    synth.set_channel_assignment(0, 0);
    synth.play_msg(msg(0x90, 62, 100));
    assert_eq!(synth.per_part_usage()[0], 2);
    // Velocity 0 is a note off.
    synth.play_msg(msg(0x90, 62, 0));
    let states: Vec<_> = synth.part(0).unwrap().polys().iter().filter(|p| p.key == 62).map(|p| p.state).collect();
    assert_eq!(states, vec![PolyState::Releasing]);
}

#[test]
fn test_part_under_reserve_steals_from_part_over_reserve() {
    let config = SynthConfig {
        max_partials: 4,
        ..dry_config()
    };
    let mut synth = open_synth(config);
    synth.set_partial_reserve([2, 2, 0, 0, 0, 0, 0, 0, 0]);
    for key in 60..64u8 {
        note_on(&mut synth, 0, key);
    }
    assert_eq!(synth.per_part_usage()[0], 4);

    note_on(&mut synth, 1, 72);
    let usage = synth.per_part_usage();
    assert_eq!((usage[0], usage[1]), (3, 1));
    // Part 0 notices its stolen note when it next reaps.
    render_frames(&mut synth, 16);
    let keys: Vec<u32> = synth.part(0).unwrap().polys().iter().filter(|p| p.is_active()).map(|p| p.key).collect();
    assert!(!keys.contains(&60), "oldest note of the over-reserve part goes first");

    // Part 0 is over its reserve, so it steals from itself.
    note_on(&mut synth, 0, 65);
    let usage = synth.per_part_usage();
    assert_eq!((usage[0], usage[1]), (3, 1));
}

#[test]
fn test_master_tune_rebuild_waits_for_idle() {
    let mut synth = open_synth(dry_config());
    let before = synth.tables().master_tune_hz;
    note_on(&mut synth, 0, 60);
    synth.set_master_tune(100);
    assert!(synth.has_pending_table_rebuild());
    render_frames(&mut synth, 256);
    assert_relative_eq!(synth.tables().master_tune_hz, before);

    note_off(&mut synth, 0, 60);
    assert!(render_until_idle(&mut synth, 64));
    render_frames(&mut synth, 16);
    assert!(!synth.has_pending_table_rebuild());
    assert_relative_eq!(synth.tables().master_tune_hz, master_tune_hz(100));
}

#[test]
fn test_master_tune_applies_at_once_when_idle() {
    let mut synth = open_synth(dry_config());
    synth.set_master_tune(0);
    assert!(!synth.has_pending_table_rebuild());
    assert_relative_eq!(synth.tables().master_tune_hz, master_tune_hz(0));
}

#[test]
fn test_pcm_partial_plays() {
    let mut synth = open_synth(dry_config());
    synth.play_event(0, PartEvent::ProgramChange(PROGRAM_PCM));
    note_on(&mut synth, 0, 60);
    let out = render_frames(&mut synth, 2000);
    assert!(peak(&out) > 100);
}

#[test]
fn test_one_shot_pcm_ends_on_its_own() {
    let mut synth = open_synth(dry_config());
    synth.play_event(0, PartEvent::ProgramChange(PROGRAM_ONE_SHOT));
    note_on(&mut synth, 0, 60);
    assert_eq!(synth.active_partial_count(), 1);

    // The wave is shorter than one block at the native PCM rate.
    let out = render_frames(&mut synth, 1024);
    assert!(peak(&out[..SINE_LEN]) > 100);
    assert_eq!(synth.active_partial_count(), 0);
    assert!(out[4 * SINE_LEN..].iter().all(|&s| s == 0));

    render_frames(&mut synth, 16);
    assert_eq!(synth.part(0).unwrap().active_poly_count(), 0);
}

#[test]
fn test_reverb_adds_a_tail() {
    let mut wet = open_synth(SynthConfig::default());
    synth_reverb_burst(&mut wet);
    let mut dry = open_synth(dry_config());
    synth_reverb_burst(&mut dry);
    assert_eq!(wet.active_partial_count(), 0);
    let tail = render_frames(&mut wet, 2000);
    assert!(peak(&tail) > 0);
    assert!(render_frames(&mut dry, 2000).iter().all(|&s| s == 0));
}

fn synth_reverb_burst(synth: &mut Synth) {
    synth.set_reverb(1, 7, 7);
    synth.play_event(0, PartEvent::ProgramChange(PROGRAM_NOSUSTAIN));
    note_on(synth, 0, 60);
    assert!(render_until_idle(synth, 64));
}

#[test]
fn test_render_f32_matches_render() {
    let mut a = open_synth(dry_config());
    let mut b = open_synth(dry_config());
    note_on(&mut a, 0, 60);
    note_on(&mut b, 0, 60);
    let ints = render_frames(&mut a, 5000);
    let mut floats = vec![0.0f32; 10000];
    b.render_f32(&mut floats);
    for (&i, &f) in ints.iter().zip(&floats) {
        assert_relative_eq!(f, i as f32 / 32768.0);
    }
}

#[test]
fn test_invalid_input_is_ignored() {
    let mut synth = open_synth(dry_config());
    synth.play_event(42, PartEvent::NoteOn { key: 60, velocity: 100 });
    synth.play_event(0, PartEvent::ProgramChange(200));
    assert_eq!(synth.part(0).unwrap().current_instr(), "Sustain");
    synth.write_timbre(999, nosustain_timbre());
    synth.play_msg(0xF8);
    synth.play_msg(0x12);
    assert_eq!(synth.active_partial_count(), 0);
    let mut odd = vec![1i16; 7];
    synth.render(&mut odd);
    assert_eq!(odd[6], 0);
}

#[test]
fn test_open_rejects_bad_config() {
    let config = SynthConfig {
        sample_rate: 100,
        ..SynthConfig::default()
    };
    assert!(matches!(
        Synth::open(config, test_bank()),
        Err(Error::InvalidConfig(_))
    ));
}
