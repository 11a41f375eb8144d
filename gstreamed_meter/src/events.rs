//! Window key/delete handling, state-change and EOS listeners, and the main loop.

use std::sync::{Arc, Mutex};

use gstreamed_common::meter::Meter;
use gstreamer::prelude::*;
use gstreamer::{self as gst, glib, MessageView, PadProbeData, PadProbeReturn, PadProbeType};
use gstreamer_video as gst_video;

/// Name of the application message carrying a released key.
const KEY_RELEASED: &str = "key-released";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Pause,
    Resume,
    Quit,
    Ignore,
}

/// Maps a released key, as named by the navigation event, to what it does.
pub fn key_action(key: &str) -> KeyAction {
    match key.to_uppercase().as_str() {
        "P" => KeyAction::Pause,
        "R" => KeyAction::Resume,
        "Q" | "ESCAPE" => KeyAction::Quit,
        _ => KeyAction::Ignore,
    }
}

/// Whether an error message is a video sink telling us its window got closed.
pub fn is_window_closed(err: &glib::Error) -> bool {
    err.matches(gst::ResourceError::NotFound) && err.message().to_lowercase().contains("window")
}

/// Forwards key releases in the render window to the bus as application
/// messages, so they get handled on the main loop rather than a streaming thread.
pub fn forward_key_events(render_pad: &gst::Pad) {
    render_pad.add_probe(PadProbeType::EVENT_UPSTREAM, |pad, info| {
        let Some(PadProbeData::Event(event)) = &info.data else {
            return PadProbeReturn::Ok;
        };
        if let Ok(gst_video::NavigationEvent::KeyRelease { key, .. }) =
            gst_video::NavigationEvent::parse(event)
        {
            let structure = gst::Structure::builder(KEY_RELEASED)
                .field("key", key.as_str())
                .build();
            if let Some(element) = pad.parent_element() {
                if let Err(err) = element.post_message(gst::message::Application::new(structure)) {
                    log::warn!("Failed to post key event: {err}");
                }
            }
        }
        PadProbeReturn::Ok
    });
}

fn stop(pipeline: &gst::Pipeline) {
    if let Err(err) = pipeline.set_state(gst::State::Null) {
        log::error!("Failed to stop pipeline: {err}");
    }
}

/// Pauses a playing pipeline; `false` if it wasn't playing or refused.
fn pause(pipeline: &gst::Pipeline) -> bool {
    pipeline.current_state() == gst::State::Playing
        && pipeline.set_state(gst::State::Paused).is_ok()
}

/// Resumes a pipeline that isn't playing; `false` if it was or refused.
fn play(pipeline: &gst::Pipeline) -> bool {
    pipeline.current_state() != gst::State::Playing
        && pipeline.set_state(gst::State::Playing).is_ok()
}

struct Listener {
    pipeline: gst::Pipeline,
    meter: Meter,
    main_loop: glib::MainLoop,
    /// First element error, returned once the loop quits.
    failure: Mutex<Option<anyhow::Error>>,
}

impl Listener {
    fn quit(&self) {
        stop(&self.pipeline);
        self.main_loop.quit();
    }

    fn on_key_released(&self, key: &str) {
        log::info!("key released = {key}");
        match key_action(key) {
            KeyAction::Pause => {
                // stop measuring while paused, a resume starts a new session
                if pause(&self.pipeline) {
                    self.meter.set_enabled(false);
                }
                log::debug!("meter enabled = {}", self.meter.is_enabled());
            }
            KeyAction::Resume => {
                if play(&self.pipeline) {
                    self.meter.set_enabled(true);
                }
                log::debug!("meter enabled = {}", self.meter.is_enabled());
            }
            KeyAction::Quit => self.quit(),
            KeyAction::Ignore => (),
        }
    }

    /// The first element error seen, if any.
    fn outcome(&self) -> anyhow::Result<()> {
        let failure = self.failure.lock().ok().and_then(|mut failure| failure.take());
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn on_message(&self, msg: &gst::Message) {
        match msg.view() {
            MessageView::Eos(..) => {
                log::info!("Pipeline EOS event");
                self.quit();
            }
            MessageView::Error(err) if is_window_closed(&err.error()) => {
                log::info!("delete window event");
                self.quit();
            }
            MessageView::Error(err) => {
                self.pipeline
                    .debug_to_dot_file(gst::DebugGraphDetails::all(), "pipeline.error");
                let name = err.src().map(|e| e.name().to_string());
                log::error!("Error from element {name:?}: {}", err.error());
                if let Ok(mut failure) = self.failure.lock() {
                    if failure.is_none() {
                        *failure = Some(anyhow::anyhow!(
                            "Error from element {name:?}: {}",
                            err.error()
                        ));
                    }
                }
                self.quit();
            }
            MessageView::StateChanged(state)
                if state.src() == Some(self.pipeline.upcast_ref::<gst::Object>()) =>
            {
                log::info!(
                    "previous state = {:?}, new state = {:?}",
                    state.old(),
                    state.current()
                );
                if state.current() == gst::State::Playing {
                    self.pipeline
                        .debug_to_dot_file(gst::DebugGraphDetails::all(), "state-playing");
                }
            }
            MessageView::Application(app) => {
                let key = app
                    .structure()
                    .filter(|s| s.has_name(KEY_RELEASED))
                    .and_then(|s| s.get::<String>("key").ok());
                if let Some(key) = key {
                    self.on_key_released(&key);
                }
            }
            _ => (),
        }
    }
}

/// Runs the main loop until EOS, an error, a quit key, or the window closing.
pub fn run_main_loop(pipeline: &gst::Pipeline, meter: &Meter) -> anyhow::Result<()> {
    let main_loop = glib::MainLoop::new(None, false);
    let listener = Arc::new(Listener {
        pipeline: pipeline.clone(),
        meter: meter.clone(),
        main_loop: main_loop.clone(),
        failure: Mutex::new(None),
    });

    let bus = pipeline
        .bus()
        .ok_or_else(|| anyhow::anyhow!("Pipeline has no bus"))?;
    let watched = Arc::clone(&listener);
    let _bus_watch = bus.add_watch(move |_bus, msg| {
        watched.on_message(msg);
        glib::ControlFlow::Continue
    })?;

    main_loop.run();

    listener.outcome()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        assert_eq!(key_action("p"), KeyAction::Pause);
        assert_eq!(key_action("P"), KeyAction::Pause);
        assert_eq!(key_action("r"), KeyAction::Resume);
        assert_eq!(key_action("q"), KeyAction::Quit);
        assert_eq!(key_action("Escape"), KeyAction::Quit);
    }

    #[test]
    fn other_keys_are_ignored() {
        assert_eq!(key_action("space"), KeyAction::Ignore);
        assert_eq!(key_action(""), KeyAction::Ignore);
    }

    #[test]
    fn closed_window_is_recognized() {
        gst::init().unwrap();
        let closed = glib::Error::new(gst::ResourceError::NotFound, "Output window was closed");
        assert!(is_window_closed(&closed));
        let missing = glib::Error::new(gst::ResourceError::NotFound, "File not found");
        assert!(!is_window_closed(&missing));
        let other = glib::Error::new(gst::ResourceError::Failed, "Output window was closed");
        assert!(!is_window_closed(&other));
    }

    fn listener() -> Listener {
        gst::init().unwrap();
        Listener {
            pipeline: gst::Pipeline::new(),
            meter: Meter::new(1, 1, Box::new(|_, _, _| true)),
            main_loop: glib::MainLoop::new(None, false),
            failure: Mutex::new(None),
        }
    }

    fn key_released(key: &str) -> gst::Message {
        let structure = gst::Structure::builder(KEY_RELEASED)
            .field("key", key)
            .build();
        gst::message::Application::new(structure)
    }

    #[test]
    fn pause_disables_meter_only_when_pipeline_was_playing() {
        let listener = listener();
        listener.pipeline.set_state(gst::State::Playing).unwrap();

        listener.on_message(&key_released("p"));
        assert_eq!(listener.pipeline.current_state(), gst::State::Paused);
        assert!(!listener.meter.is_enabled());

        // already paused: the meter is left alone
        listener.meter.set_enabled(true);
        listener.on_message(&key_released("P"));
        assert_eq!(listener.pipeline.current_state(), gst::State::Paused);
        assert!(listener.meter.is_enabled());

        listener.pipeline.set_state(gst::State::Null).unwrap();
    }

    #[test]
    fn resume_enables_meter_only_when_pipeline_was_not_playing() {
        let listener = listener();
        listener.pipeline.set_state(gst::State::Paused).unwrap();
        listener.meter.set_enabled(false);

        listener.on_message(&key_released("r"));
        assert_eq!(listener.pipeline.current_state(), gst::State::Playing);
        assert!(listener.meter.is_enabled());

        // already playing: the meter is left alone
        listener.meter.set_enabled(false);
        listener.on_message(&key_released("R"));
        assert!(!listener.meter.is_enabled());

        listener.pipeline.set_state(gst::State::Null).unwrap();
    }

    #[test]
    fn quit_key_stops_pipeline() {
        let listener = listener();
        listener.pipeline.set_state(gst::State::Playing).unwrap();
        listener.on_message(&key_released("q"));
        assert_eq!(listener.pipeline.current_state(), gst::State::Null);
        assert!(listener.outcome().is_ok());
    }

    #[test]
    fn eos_stops_pipeline_without_failure() {
        let listener = listener();
        listener.pipeline.set_state(gst::State::Playing).unwrap();
        listener.on_message(&gst::message::Eos::new());
        assert_eq!(listener.pipeline.current_state(), gst::State::Null);
        assert!(listener.outcome().is_ok());
    }

    #[test]
    fn closed_window_stops_pipeline_without_failure() {
        let listener = listener();
        listener.pipeline.set_state(gst::State::Playing).unwrap();
        let msg =
            gst::message::Error::builder(gst::ResourceError::NotFound, "Output window was closed")
                .build();
        listener.on_message(&msg);
        assert_eq!(listener.pipeline.current_state(), gst::State::Null);
        assert!(listener.outcome().is_ok());
    }

    #[test]
    fn element_error_stops_pipeline_and_fails() {
        let listener = listener();
        listener.pipeline.set_state(gst::State::Playing).unwrap();
        let msg = gst::message::Error::builder(gst::CoreError::Failed, "decoder exploded").build();
        listener.on_message(&msg);
        // only the first error is kept
        let later = gst::message::Error::builder(gst::CoreError::Failed, "second").build();
        listener.on_message(&later);
        assert_eq!(listener.pipeline.current_state(), gst::State::Null);

        let err = listener.outcome().unwrap_err();
        assert!(err.to_string().contains("decoder exploded"));
        // the failure is reported once
        assert!(listener.outcome().is_ok());
    }
}
