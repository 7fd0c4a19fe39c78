//! Audio and subtitle track resolution.
//!
//! Audio is resolved first, once per source after discovery:
//!
//! 1. explicit preference (e.g. carried over from the previous item) by language
//! 2. the same preference by index
//! 3. the persisted cross-session preference, language then index
//! 4. the first track in the default language family, otherwise the first track
//!
//! Subtitles are resolved after audio because the heuristic depends on the
//! resolved audio language.

use sceneforged_common::lang::{family, same_family};
use sceneforged_common::{SessionPreferences, SubtitleSelection, TrackSet};
use serde::{Deserialize, Serialize};

use crate::config::{SubtitleHeuristic, TrackConfig};

/// Why an audio track was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioReason {
    ExplicitLanguage,
    ExplicitIndex,
    PersistedLanguage,
    PersistedIndex,
    DefaultLanguage,
    FirstTrack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioResolution {
    pub index: usize,
    /// Language of the chosen track, when the track list is known.
    pub language: Option<String>,
    pub reason: AudioReason,
}

/// Why a subtitle selection was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleReason {
    Explicit,
    Persisted,
    /// Forced track for native-language audio.
    ForcedForNativeAudio,
    /// Full track for foreign-language audio.
    FullForForeignAudio,
    /// Nothing matched, or the heuristic is off.
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleResolution {
    pub selection: SubtitleSelection,
    pub reason: SubtitleReason,
}

/// Resolves tracks for a session from preferences and heuristics.
#[derive(Debug, Clone)]
pub struct TrackResolver {
    default_language: String,
    heuristic: SubtitleHeuristic,
}

impl TrackResolver {
    pub fn new(config: &TrackConfig) -> Self {
        Self {
            default_language: config.default_language.clone(),
            heuristic: config.subtitle_heuristic,
        }
    }

    pub fn resolve_audio(
        &self,
        tracks: &TrackSet,
        explicit: Option<&SessionPreferences>,
        persisted: Option<&SessionPreferences>,
    ) -> AudioResolution {
        let candidates = [
            (
                explicit,
                AudioReason::ExplicitLanguage,
                AudioReason::ExplicitIndex,
            ),
            (
                persisted,
                AudioReason::PersistedLanguage,
                AudioReason::PersistedIndex,
            ),
        ];

        for (prefs, by_language, by_index) in candidates {
            let Some(prefs) = prefs else { continue };

            if let Some(lang) = prefs.audio_language.as_deref() {
                if let Some(track) = tracks.audio.iter().find(|t| same_family(&t.language, lang)) {
                    return AudioResolution {
                        index: track.index,
                        language: Some(track.language.clone()),
                        reason: by_language,
                    };
                }
            }

            if let Some(index) = prefs.audio_track_index {
                // Without discovery there is nothing to validate against.
                if tracks.audio.is_empty() {
                    return AudioResolution {
                        index,
                        language: prefs.audio_language.clone(),
                        reason: by_index,
                    };
                }
                if let Some(track) = tracks.audio_track(index) {
                    return AudioResolution {
                        index,
                        language: Some(track.language.clone()),
                        reason: by_index,
                    };
                }
            }
        }

        if let Some(track) = tracks
            .audio
            .iter()
            .find(|t| same_family(&t.language, &self.default_language))
        {
            return AudioResolution {
                index: track.index,
                language: Some(track.language.clone()),
                reason: AudioReason::DefaultLanguage,
            };
        }

        let first = tracks.audio.first();
        AudioResolution {
            index: first.map(|t| t.index).unwrap_or(0),
            language: first.map(|t| t.language.clone()),
            reason: AudioReason::FirstTrack,
        }
    }

    pub fn resolve_subtitle(
        &self,
        tracks: &TrackSet,
        audio: &AudioResolution,
        explicit: Option<&SessionPreferences>,
        persisted: Option<&SessionPreferences>,
    ) -> SubtitleResolution {
        for (prefs, reason) in [
            (explicit, SubtitleReason::Explicit),
            (persisted, SubtitleReason::Persisted),
        ] {
            match prefs.and_then(|p| p.subtitle_track_index) {
                Some(SubtitleSelection::None) => {
                    return SubtitleResolution {
                        selection: SubtitleSelection::None,
                        reason,
                    };
                }
                Some(SubtitleSelection::Track(index))
                    if tracks.subtitles.is_empty() || tracks.subtitle_track(index).is_some() =>
                {
                    return SubtitleResolution {
                        selection: SubtitleSelection::Track(index),
                        reason,
                    };
                }
                _ => {}
            }
        }

        self.heuristic_subtitle(tracks, audio)
    }

    /// The overridable default used when nobody expressed a preference.
    fn heuristic_subtitle(&self, tracks: &TrackSet, audio: &AudioResolution) -> SubtitleResolution {
        let none = SubtitleResolution {
            selection: SubtitleSelection::None,
            reason: SubtitleReason::NoMatch,
        };

        if self.heuristic == SubtitleHeuristic::Off || family(&self.default_language).is_none() {
            return none;
        }
        let Some(audio_language) = audio.language.as_deref() else {
            return none;
        };

        let native_audio = same_family(audio_language, &self.default_language);
        let wanted_forced = native_audio;

        let pick = tracks.subtitles.iter().find(|t| {
            !t.is_downloaded
                && t.forced == wanted_forced
                && same_family(&t.language, &self.default_language)
        });

        match pick {
            Some(track) => SubtitleResolution {
                selection: SubtitleSelection::Track(track.index),
                reason: if native_audio {
                    SubtitleReason::ForcedForNativeAudio
                } else {
                    SubtitleReason::FullForForeignAudio
                },
            },
            None => none,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sceneforged_common::{AudioTrack, SubtitleTrack};

    fn audio(index: usize, language: &str) -> AudioTrack {
        AudioTrack {
            index,
            language: language.into(),
            title: None,
            codec: None,
        }
    }

    fn resolver(lang: &str) -> TrackResolver {
        TrackResolver::new(&TrackConfig {
            default_language: lang.into(),
            ..Default::default()
        })
    }

    fn tracks(audio_langs: &[&str], subs: Vec<SubtitleTrack>) -> TrackSet {
        TrackSet {
            audio: audio_langs
                .iter()
                .enumerate()
                .map(|(i, l)| audio(i, l))
                .collect(),
            subtitles: subs,
        }
    }

    #[test]
    fn test_explicit_language_beats_saved_index() {
        let set = tracks(&["fr", "en", "es"], vec![]);
        let explicit = SessionPreferences {
            audio_language: Some("en".into()),
            ..Default::default()
        };
        let saved = SessionPreferences {
            audio_track_index: Some(0),
            ..Default::default()
        };

        let r = resolver("fr").resolve_audio(&set, Some(&explicit), Some(&saved));
        assert_eq!(r.index, 1);
        assert_eq!(r.reason, AudioReason::ExplicitLanguage);
    }

    #[test]
    fn test_explicit_index_when_language_missing() {
        let set = tracks(&["fr", "en", "es"], vec![]);
        let explicit = SessionPreferences {
            audio_track_index: Some(2),
            audio_language: Some("ja".into()),
            ..Default::default()
        };
        let r = resolver("fr").resolve_audio(&set, Some(&explicit), None);
        assert_eq!(r.index, 2);
        assert_eq!(r.reason, AudioReason::ExplicitIndex);
    }

    #[test]
    fn test_persisted_language_then_index() {
        let set = tracks(&["fr", "de"], vec![]);
        let saved = SessionPreferences {
            audio_language: Some("ger".into()),
            ..Default::default()
        };
        let r = resolver("fr").resolve_audio(&set, None, Some(&saved));
        assert_eq!(r.index, 1);
        assert_eq!(r.reason, AudioReason::PersistedLanguage);

        let saved = SessionPreferences {
            audio_track_index: Some(1),
            ..Default::default()
        };
        let r = resolver("fr").resolve_audio(&set, None, Some(&saved));
        assert_eq!(r.reason, AudioReason::PersistedIndex);
    }

    #[test]
    fn test_out_of_range_index_falls_through() {
        let set = tracks(&["es", "fr"], vec![]);
        let explicit = SessionPreferences {
            audio_track_index: Some(9),
            ..Default::default()
        };
        let r = resolver("fr").resolve_audio(&set, Some(&explicit), None);
        assert_eq!(r.index, 1);
        assert_eq!(r.reason, AudioReason::DefaultLanguage);
    }

    #[test]
    fn test_first_track_fallback() {
        let set = tracks(&["ja", "ko"], vec![]);
        let r = resolver("fr").resolve_audio(&set, None, None);
        assert_eq!(r.index, 0);
        assert_eq!(r.reason, AudioReason::FirstTrack);
    }

    #[test]
    fn test_no_discovery_keeps_explicit_index() {
        let explicit = SessionPreferences {
            audio_track_index: Some(3),
            ..Default::default()
        };
        let r = resolver("fr").resolve_audio(&TrackSet::default(), Some(&explicit), None);
        assert_eq!(r.index, 3);

        let r = resolver("fr").resolve_audio(&TrackSet::default(), None, None);
        assert_eq!(r.index, 0);
        assert_eq!(r.language, None);
    }

    #[test]
    fn test_native_audio_picks_forced_subtitle() {
        let set = tracks(
            &["fr"],
            vec![
                SubtitleTrack::embedded(0, "fr", false),
                SubtitleTrack::embedded(1, "fr", true),
            ],
        );
        let r = resolver("fr");
        let a = r.resolve_audio(&set, None, None);
        let s = r.resolve_subtitle(&set, &a, None, None);
        assert_eq!(s.selection, SubtitleSelection::Track(1));
        assert_eq!(s.reason, SubtitleReason::ForcedForNativeAudio);
    }

    #[test]
    fn test_native_audio_without_forced_is_none() {
        let set = tracks(&["fr"], vec![SubtitleTrack::embedded(0, "fr", false)]);
        let r = resolver("fr");
        let a = r.resolve_audio(&set, None, None);
        let s = r.resolve_subtitle(&set, &a, None, None);
        assert_eq!(s.selection, SubtitleSelection::None);
    }

    #[test]
    fn test_foreign_audio_picks_full_subtitle() {
        let set = tracks(
            &["ja"],
            vec![
                SubtitleTrack::embedded(0, "fr", true),
                SubtitleTrack::embedded(1, "en", false),
                SubtitleTrack::embedded(2, "fre", false),
            ],
        );
        let r = resolver("fr");
        let a = r.resolve_audio(&set, None, None);
        let s = r.resolve_subtitle(&set, &a, None, None);
        assert_eq!(s.selection, SubtitleSelection::Track(2));
        assert_eq!(s.reason, SubtitleReason::FullForForeignAudio);
    }

    #[test]
    fn test_explicit_none_wins_over_heuristic() {
        let set = tracks(&["ja"], vec![SubtitleTrack::embedded(0, "fr", false)]);
        let explicit = SessionPreferences {
            subtitle_track_index: Some(SubtitleSelection::None),
            ..Default::default()
        };
        let r = resolver("fr");
        let a = r.resolve_audio(&set, None, None);
        let s = r.resolve_subtitle(&set, &a, Some(&explicit), None);
        assert_eq!(s.selection, SubtitleSelection::None);
        assert_eq!(s.reason, SubtitleReason::Explicit);
    }

    #[test]
    fn test_persisted_subtitle_index() {
        let set = tracks(
            &["fr"],
            vec![
                SubtitleTrack::embedded(0, "fr", true),
                SubtitleTrack::embedded(1, "en", false),
            ],
        );
        let saved = SessionPreferences {
            subtitle_track_index: Some(SubtitleSelection::Track(1)),
            ..Default::default()
        };
        let r = resolver("fr");
        let a = r.resolve_audio(&set, None, None);
        let s = r.resolve_subtitle(&set, &a, None, Some(&saved));
        assert_eq!(s.selection, SubtitleSelection::Track(1));
        assert_eq!(s.reason, SubtitleReason::Persisted);
    }

    #[test]
    fn test_heuristic_off() {
        let set = tracks(&["fr"], vec![SubtitleTrack::embedded(0, "fr", true)]);
        let r = TrackResolver::new(&TrackConfig {
            default_language: "fr".into(),
            subtitle_heuristic: SubtitleHeuristic::Off,
            ..Default::default()
        });
        let a = r.resolve_audio(&set, None, None);
        assert_eq!(
            r.resolve_subtitle(&set, &a, None, None).selection,
            SubtitleSelection::None
        );
    }
}
