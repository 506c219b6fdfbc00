use bitflags::bitflags;

bitflags! {
    /// Options controlling a [`SpecFile::cleanup`](crate::spec_file::SpecFile::cleanup) pass
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct CleanupOptions: u8 {
        /// Keep measurements in the order they were added or decoded
        const PRESERVE_ORDER = 0b0001;
        /// Order measurements by start time, then sample number, instead of by sample number
        const REORDER_BY_TIME = 0b0010;
        /// Rebin every gamma spectrum onto the calibration of the first one
        const REBIN_TO_COMMON = 0b0100;
        /// Give colliding measurements a new sample number instead of rejecting them
        const AUTO_RENUMBER = 0b1000;
    }
}

bitflags! {
    /// Properties of the measurement set, recomputed by every cleanup pass
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FileProperties: u16 {
        /// Measurements are not in ascending start time order
        const NOT_TIME_SORTED = 0b0000_0001;
        /// Measurements are not in ascending sample number order
        const NOT_SAMPLE_SORTED = 0b0000_0010;
        /// Every gamma spectrum shares the same energy calibration
        const HAS_COMMON_BINNING = 0b0000_0100;
        /// At least one measurement has a valid position
        const HAS_GPS_INFO = 0b0000_1000;
        /// At least one measurement has neutron counts
        const HAS_NEUTRONS = 0b0001_0000;
        /// At least one measurement reports a live time greater than its real time
        const HAS_TIME_INCONSISTENCY = 0b0010_0000;
        /// Some gamma spectra have different numbers of channels
        const MIXED_CHANNEL_COUNTS = 0b0100_0000;
    }
}
