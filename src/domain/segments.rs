//! Per-segment-type agenda configuration: which fields an agenda editor may
//! change and the placeholder text shown for them. Expressed as a static
//! lookup table keyed by the segment type string.

/// Editability plus placeholder for one agenda field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditableField {
    pub editable: bool,
    pub placeholder: &'static str,
}

impl EditableField {
    const fn locked(placeholder: &'static str) -> Self {
        Self {
            editable: false,
            placeholder,
        }
    }

    const fn open(placeholder: &'static str) -> Self {
        Self {
            editable: true,
            placeholder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentTypeConfig {
    pub segment_type: &'static str,
    pub role_taker: EditableField,
    pub title: EditableField,
    pub content: EditableField,
    pub related_segments: EditableField,
    /// True when every timing for this segment must name the speaker.
    pub requires_speaker_name: bool,
}

const CUSTOM_SEGMENT: SegmentTypeConfig = SegmentTypeConfig {
    segment_type: "Custom segment",
    role_taker: EditableField::open("Assign role taker"),
    title: EditableField::open("Enter title"),
    content: EditableField::open("Enter content"),
    related_segments: EditableField::open("Add related segments"),
    requires_speaker_name: false,
};

const SEGMENT_TYPES: &[SegmentTypeConfig] = &[
    SegmentTypeConfig {
        segment_type: "Members and Guests Registration, Warm up",
        role_taker: EditableField::locked("All attendees"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Meeting Rules Introduction (SAA)",
        role_taker: EditableField::open("Assign SAA"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Opening Remarks (President)",
        role_taker: EditableField::open("Assign president"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "TOM (Toastmaster of Meeting) Introduction",
        role_taker: EditableField::open("Assign TOM"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Timer",
        role_taker: EditableField::open("Assign timer"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Hark Master",
        role_taker: EditableField::open("Assign hark master"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Guests Self Introduction (30s per guest)",
        role_taker: EditableField::locked("All guests"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "TTM (Table Topic Master) Opening",
        role_taker: EditableField::open("Assign TTM"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Table Topic Session",
        role_taker: EditableField::locked("All attendees"),
        title: EditableField::locked(""),
        content: EditableField::open("Enter WOT (Word of Today)"),
        related_segments: EditableField::locked(""),
        requires_speaker_name: true,
    },
    SegmentTypeConfig {
        segment_type: "Prepared Speech",
        role_taker: EditableField::open("Assign Speaker"),
        title: EditableField::open("Enter speech title"),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Tea Break & Group Photos",
        role_taker: EditableField::locked("All attendees"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Table Topic Evaluation",
        role_taker: EditableField::open("Assign evaluator"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Prepared Speech Evaluation",
        role_taker: EditableField::open("Assign evaluator"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::open("Add related speech"),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Timer's Report",
        role_taker: EditableField::locked("Timer"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "General Evaluation",
        role_taker: EditableField::open("Assign evaluator"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::open("Add related segments"),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Voting Section",
        role_taker: EditableField::open("Assign TOM"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Moment of Truth",
        role_taker: EditableField::open("Assign evaluator"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Awards (President)",
        role_taker: EditableField::open("Assign president"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
    SegmentTypeConfig {
        segment_type: "Closing Remarks (President)",
        role_taker: EditableField::open("Assign president"),
        title: EditableField::locked(""),
        content: EditableField::locked(""),
        related_segments: EditableField::locked(""),
        requires_speaker_name: false,
    },
];

/// Looks up the configuration for a segment type. Speech and evaluation
/// types match by prefix so numbered variants ("Prepared Speech 1") resolve;
/// anything else falls back to the custom segment.
pub fn segment_type_config(segment_type: &str) -> &'static SegmentTypeConfig {
    let trimmed = segment_type.trim();
    if let Some(config) = SEGMENT_TYPES
        .iter()
        .find(|config| config.segment_type == trimmed)
    {
        return config;
    }
    if trimmed.starts_with("Prepared Speech") {
        let wanted = if trimmed.contains("Evaluation") {
            "Prepared Speech Evaluation"
        } else {
            "Prepared Speech"
        };
        if let Some(config) = SEGMENT_TYPES
            .iter()
            .find(|config| config.segment_type == wanted)
        {
            return config;
        }
    }
    &CUSTOM_SEGMENT
}

/// True when timings for this segment type must carry a speaker name.
pub fn requires_speaker_name(segment_type: &str) -> bool {
    segment_type_config(segment_type).requires_speaker_name
}
