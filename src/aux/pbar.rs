use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Spinner shown while the driver blocks on the queue.
///
/// Draws to stderr and stays invisible when stderr is not a terminal, which
/// is the case inside a batch job.
pub(crate) fn prepare_spinner(msg: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(2));

    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg} ({pos} polls)")
    {
        pb.set_style(style);
    }
    pb.set_message(msg);

    pb
}

#[inline]
pub fn get_hms(dur_secs: f64) -> String {
    let (hours, rem) = div_mod(dur_secs, 3600_f64);
    let (mins, rem) = div_mod(rem, 60_f64);
    let secs = rem % 60_f64;

    format!("{:0>2}:{:0>2}:{:0>4.1}", hours, mins, secs)
}

fn div_mod(n: f64, d: f64) -> (f64, f64) {
    ((n / d).trunc(), n % d)
}
