use std::cmp;

/// Streaming linear resampler for mono float audio.
///
/// Keeps an accumulator of unconsumed input so callers can push chunks of
/// any size; each call emits as many output samples as the accumulated
/// input allows. Linear interpolation is enough for speech on both the
/// uplink (device rate to 16 kHz) and the loopback echo path.
pub struct StreamResampler {
    in_rate: u32,
    out_rate: u32,
    /// Unconsumed mono input.
    acc: Vec<f32>,
    /// Fractional read position into `acc`, in input samples.
    phase: f32,
    /// Phase advance per output sample: in_rate / out_rate.
    inc: f32,
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        Self {
            in_rate,
            out_rate,
            acc: Vec::with_capacity(in_rate.min(out_rate) as usize),
            phase: 0.0,
            inc: in_rate as f32 / out_rate as f32,
        }
    }

    /// Pushes a chunk of mono samples and returns whatever output is ready.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.in_rate == self.out_rate {
            return input.to_vec();
        }

        self.acc.extend_from_slice(input);

        let max_out = ((self.acc.len() as f32 - self.phase).max(0.0) / self.inc) as usize;
        let mut out = Vec::with_capacity(max_out + 1);

        // Interpolation needs the sample after the read position.
        while (self.phase + 1.0) < (self.acc.len() as f32) {
            let idx = self.phase as usize;
            let frac = self.phase - idx as f32;
            let s0 = self.acc[idx];
            let s1 = self.acc[idx + 1];
            out.push(s0 * (1.0 - frac) + s1 * frac);
            self.phase += self.inc;
        }

        // Drop fully consumed input to keep the accumulator bounded.
        let consumed = cmp::min(self.phase as usize, self.acc.len());
        if consumed > 0 {
            self.acc.drain(..consumed);
            self.phase -= consumed as f32;
        }

        out
    }

    pub fn reset(&mut self) {
        self.acc.clear();
        self.phase = 0.0;
    }

    pub fn input_rate(&self) -> u32 {
        self.in_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.out_rate
    }
}
