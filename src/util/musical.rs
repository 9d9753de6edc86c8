//! 12-TET note mapping for labelling analysis bands.

const A440_HZ: f32 = 440.0;
const A440_MIDI: i32 = 69;
const SEMITONES_PER_OCTAVE: i32 = 12;
const MIDI_OCTAVE_OFFSET: i32 = 1;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Name of pitch class `index` (0 = C … 11 = B).
pub fn pitch_class_name(index: usize) -> &'static str {
    NOTE_NAMES[index % NOTE_NAMES.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalNote {
    pub midi_number: i32,
    pub name: &'static str,
    pub octave: i32,
}

impl MusicalNote {
    /// Nearest equal-temperament note: midi = 69 + 12 * log2(freq / 440).
    pub fn from_frequency(freq_hz: f32) -> Option<Self> {
        if freq_hz <= 0.0 || !freq_hz.is_finite() {
            return None;
        }

        let midi_float =
            A440_MIDI as f32 + SEMITONES_PER_OCTAVE as f32 * (freq_hz / A440_HZ).log2();
        let midi_number = midi_float.round() as i32;

        let note_index = ((midi_number % SEMITONES_PER_OCTAVE + SEMITONES_PER_OCTAVE)
            % SEMITONES_PER_OCTAVE) as usize;
        let octave = (midi_number / SEMITONES_PER_OCTAVE) - MIDI_OCTAVE_OFFSET;

        Some(Self {
            midi_number,
            name: NOTE_NAMES[note_index],
            octave,
        })
    }

    /// Position of this note within its octave (0 = C … 11 = B).
    pub fn pitch_class(&self) -> usize {
        ((self.midi_number % SEMITONES_PER_OCTAVE + SEMITONES_PER_OCTAVE)
            % SEMITONES_PER_OCTAVE) as usize
    }

    pub fn format(&self) -> String {
        format!("{}{}", self.name, self.octave)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concert_pitch_maps_to_a4() {
        let note = MusicalNote::from_frequency(440.0).expect("valid frequency");
        assert_eq!(note.format(), "A4");
        assert_eq!(note.midi_number, 69);
        assert_eq!(note.pitch_class(), 9);
    }

    #[test]
    fn low_c_maps_to_pitch_class_zero() {
        let note = MusicalNote::from_frequency(130.81).expect("valid frequency");
        assert_eq!(note.name, "C");
        assert_eq!(note.pitch_class(), 0);
        assert_eq!(pitch_class_name(note.pitch_class()), "C");
    }

    #[test]
    fn rejects_degenerate_frequencies() {
        assert!(MusicalNote::from_frequency(0.0).is_none());
        assert!(MusicalNote::from_frequency(-5.0).is_none());
        assert!(MusicalNote::from_frequency(f32::NAN).is_none());
    }
}
