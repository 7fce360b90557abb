//! Streaming Adapter (C4) — normalizes model stream events and recovers
//! dropped prefix text (spec §4.4).

/// One event from a model node's stream, as delivered by the model client
/// (spec §6, "Model client"). Providers may front-load initial text in
/// `PartStart`/`FinalResult` and then continue mid-string in deltas; that
/// quirk is what the prefix-seeding rule below exists to correct for.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    PartStart { content: Option<String> },
    TextDelta { content: String },
    FinalResult { content: Option<String> },
}

/// A capability for emitting normalized text in emission order. Opaque
/// function capability per §9 ("no dynamic lookup, no global UI coupling").
pub trait StreamSink: Send {
    fn emit(&mut self, text_delta: &str);
}

impl<F: FnMut(&str) + Send> StreamSink for F {
    fn emit(&mut self, text_delta: &str) {
        self(text_delta)
    }
}

/// Performs the one-shot prefix alignment for a single node's stream.
///
/// Usage: construct once per node, feed it every `StreamEvent` in order,
/// and read back the assembled text via `assembled()` once the node
/// completes (the Node Processor, C5, needs the full text to check for the
/// completion marker and for emptiness).
pub struct StreamingAdapter {
    pre_delta_text: Option<String>,
    seeded: bool,
    seen_first_delta: bool,
    assembled: String,
}

impl StreamingAdapter {
    pub fn new() -> Self {
        Self {
            pre_delta_text: None,
            seeded: false,
            seen_first_delta: false,
            assembled: String::new(),
        }
    }

    /// Process one event, emitting zero or more text fragments to `sink` in
    /// the order spec §4.4 describes. Returns nothing to the caller beyond
    /// `sink` callbacks; call `assembled()` after the stream ends.
    pub fn handle_event(&mut self, event: StreamEvent, sink: &mut dyn StreamSink) {
        match event {
            StreamEvent::PartStart { content } => {
                if !self.seen_first_delta {
                    if let Some(c) = content {
                        self.capture_pre_delta(&c);
                    }
                }
            }
            StreamEvent::FinalResult { content } => {
                if !self.seen_first_delta {
                    if let Some(c) = content {
                        self.capture_pre_delta(&c);
                        // A FinalResult with no subsequent delta is itself the
                        // complete text; emit it directly (there is no delta
                        // to align against).
                        self.emit_and_record(&c, sink);
                        self.seen_first_delta = true;
                    }
                }
            }
            StreamEvent::TextDelta { content: delta } => {
                if !self.seen_first_delta {
                    self.seen_first_delta = true;
                    self.seed_then_emit(&delta, sink);
                } else {
                    self.emit_and_record(&delta, sink);
                }
            }
        }
    }

    fn capture_pre_delta(&mut self, text: &str) {
        // Only the first non-empty capture counts; later PartStart/FinalResult
        // events before any delta are rare and we keep the first sighting.
        if self.pre_delta_text.is_none() && !text.is_empty() {
            self.pre_delta_text = Some(text.to_string());
        }
    }

    /// Apply the one-shot seeding rule (§4.4, steps 2-3) against the first
    /// delta, then emit the delta itself.
    ///
    /// `k = index_of(D, P)` is read as "the position at which D occurs
    /// within P" (so that slicing `P[0:k]` below is well-formed): if D
    /// occurs at P's very start, D already supersedes P and needs no help;
    /// if D occurs later in P, the characters before it (`P[0:k]`) were
    /// dropped and must be seeded; if D doesn't occur in P at all, P and D
    /// don't overlap and P must be emitted whole before D.
    fn seed_then_emit(&mut self, delta: &str, sink: &mut dyn StreamSink) {
        if self.seeded {
            self.emit_and_record(delta, sink);
            return;
        }
        self.seeded = true;

        let Some(pre) = self.pre_delta_text.clone() else {
            self.emit_and_record(delta, sink);
            return;
        };

        match pre.find(delta) {
            Some(0) => self.emit_and_record(delta, sink),
            Some(k) => {
                self.emit_and_record(&pre[..k], sink);
                self.emit_and_record(delta, sink);
            }
            None => {
                self.emit_and_record(&pre, sink);
                self.emit_and_record(delta, sink);
            }
        }
    }

    fn emit_and_record(&mut self, text: &str, sink: &mut dyn StreamSink) {
        if text.is_empty() {
            return;
        }
        self.assembled.push_str(text);
        sink.emit(text);
    }

    pub fn assembled(&self) -> &str {
        &self.assembled
    }
}

impl Default for StreamingAdapter {
    fn default() -> Self {
        Self::new()
    }
}
