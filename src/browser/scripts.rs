//! Scripts evaluated inside rendered pages.

/// Stops audio/video playback so it neither downloads nor keeps the page busy.
pub(crate) const PAUSE_MEDIA_SCRIPT: &str = r#"
(() => {
  for (const media of document.querySelectorAll('video, audio')) {
    try {
      media.pause();
      media.preload = 'none';
    } catch (_) {}
  }
})()
"#;

/// Silences a page whose snapshot has been taken: pending timers are
/// cleared and new network calls or animation frames never run.
pub(crate) const NEUTRALIZE_SCRIPT: &str = r#"
(() => {
  for (let id = 1; id < 99999; id++) {
    window.clearInterval(id);
    window.clearTimeout(id);
  }
  if (window.XMLHttpRequest) {
    window.XMLHttpRequest.prototype.send = function () {};
  }
  window.fetch = function () { return new Promise(function () {}); };
  window.requestAnimationFrame = function () { return 0; };
})()
"#;
