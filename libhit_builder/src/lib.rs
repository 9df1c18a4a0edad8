//! # hit_builder
//!
//! hit_builder turns raw JANUS silicon array data into physics hits, written in Rust. It
//! reads the NSCLDAQ .evt files of a run, decodes the VM-USB/CAEN buffers inside the physics
//! ring items, pairs front and back strips into hits, and groups the hits of each detector
//! system into build windows that are written to one or more output streams.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Writing HDF5 output is behind the `hdf5` cargo feature. Without it the builder still runs
//! every run and reports what each stream would have written, which is handy for checking a
//! channel map or a build window. To write files, HDF5 must be installed. Typically this will
//! be installed using a package manager (homebrew, apt, etc), and the Rust libraries will
//! auto detect the location of the HDF install. If it is installed to a custom location,
//! write the following snippet into `.cargo/config.toml` in the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./hit_builder_cli --features hdf5`
//! from the top level repository.
//!
//! ## Configuration
//!
//! A configuration file is YAML. A template can be made with `hit_builder_cli new -p config.yml`:
//!
//! ```yml
//! evt_path: null
//! output_path: None
//! channel_map_path: null
//! first_run_number: 0
//! last_run_number: 0
//! n_threads: 1
//! sources:
//! - source_id: null
//!   system: janus
//! streams:
//! - name: janus
//!   build_window: immediate
//!   systems:
//!   - janus
//! unknown_channel_notice_limit: 1000
//! discard_foreign_triggers: false
//! ```
//!
//! - `evt_path`: directory containing the NSCLDAQ run directories (`run#`)
//! - `output_path`: directory to which output files (`run_####.h5`) are written
//! - `channel_map_path`: CSV channel map; `null` uses the bundled JANUS map
//! - `sources`: which detector system the physics items of each source id belong to. A
//! `null` source id matches items without a body header.
//! - `streams`: output streams. `build_window` is `immediate` (one record per buffer) or
//! `!window N`, a build window of N ns. `systems` lists the detector systems the stream
//! takes; an empty list takes all of them.
//! - `unknown_channel_notice_limit`: how many unmapped channels are reported before the
//! builder goes quiet about them
//! - `discard_foreign_triggers`: drop buffers read out by a non-primary VM-USB stack
//!
//! ### Channel Map Format
//!
//! The channel map is a CSV file with a header line and the columns
//!
//! ```csv
//! system,crate,slot,channel,detector,side,strip
//! ```
//!
//! `side` is `F` (front, rings) or `B` (back, sectors). TDC channels share the map entry of
//! the ADC channel they belong to.
//!
//! ## Output
//!
//! ```text
//! run_0001.h5
//! streams - version, run_number, run_title, run_start, run_stop, run_time
//! |---- <stream name> - build_window, n_records, n_hits
//! |    |---- record_#(dset) - timestamp
//! ```
//!
//! Each record dataset has one row per hit and the columns system, address, timestamp,
//! charge, time, flags, back_address, back_charge, back_time, back_timestamp.
pub mod channel_map;
pub mod config;
pub mod constants;
pub mod detector;
pub mod error;
pub mod event_builder;
pub mod evt_file;
pub mod evt_stack;
pub mod hardware_id;
#[cfg(feature = "hdf5")]
pub mod hdf_writer;
pub mod hit;
pub mod janus;
pub mod notice;
pub mod pipeline;
pub mod process;
pub mod ring_item;
pub mod sink;
pub mod vmusb;
pub mod worker_status;

#[cfg(test)]
mod testing;
