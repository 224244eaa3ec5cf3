//! The decoder side of image switching.

use std::sync::Arc;

use ipt_observer::CallbackError;

use crate::image::ProcessContext;

/// A decoder whose memory image can be replaced while it runs.
pub trait ImageSwitch {
    /// Decode from `context`'s image from now on.
    fn set_image(&mut self, context: &Arc<ProcessContext>) -> Result<(), CallbackError>;
}

impl<F> ImageSwitch for F
where
    F: FnMut(&Arc<ProcessContext>) -> Result<(), CallbackError>,
{
    fn set_image(&mut self, context: &Arc<ProcessContext>) -> Result<(), CallbackError> {
        self(context)
    }
}
