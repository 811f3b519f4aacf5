pub mod commands;
pub mod easrun;
pub mod epg;
pub mod interstitial;
pub mod player;
pub mod tuner;
