pub mod ad_filter_utils;
pub mod browser_profile_utils;
pub mod cancellation_utils;
pub mod clock_utils;
