/// Switches of a recurrent layer. All off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RnnConfig {
    /// Output the step output of every timestep instead of the last one.
    pub return_sequences: bool,
    /// Also output the final states.
    pub return_state: bool,
    /// Iterate the time axis from the end. Sequence outputs keep the input
    /// time order.
    pub go_backwards: bool,
    /// Keep the final states across calls, instead of starting from zeros.
    pub stateful: bool,
    /// Expand the time loop at graph construction instead of wiring a scan.
    pub unroll: bool,
}

impl RnnConfig {
    pub fn with_return_sequences(self, return_sequences: bool) -> RnnConfig {
        RnnConfig { return_sequences, ..self }
    }

    pub fn with_return_state(self, return_state: bool) -> RnnConfig {
        RnnConfig { return_state, ..self }
    }

    pub fn with_go_backwards(self, go_backwards: bool) -> RnnConfig {
        RnnConfig { go_backwards, ..self }
    }

    pub fn with_stateful(self, stateful: bool) -> RnnConfig {
        RnnConfig { stateful, ..self }
    }

    pub fn with_unroll(self, unroll: bool) -> RnnConfig {
        RnnConfig { unroll, ..self }
    }
}
