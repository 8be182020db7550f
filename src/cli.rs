use crate::audio_io::{read_audio_file, write_audio_file};
use crate::effects::pitch_shifting::PitchShiftingEffect;
use crate::effects::robotiser::RobotiserEffect;
use crate::effects::time_stretching::TimeStretchingEffect;
use crate::effects::vocal_tract::VocalTractEffect;
use crate::effects::{AudioEffect, ParameterValue, Parameters};
use crate::error::{Error, Result};
use clap::{ArgAction, Parser};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "voicefxrs")]
#[command(about = "Voice effects: FD-PSOLA pitch and time scaling, formant shifting, robot voice")]
pub struct CliArgs {
    /// Effect to apply.
    #[arg(required_unless_present_any = ["list", "info"])]
    pub effect: Option<String>,

    /// Input WAV file.
    #[arg(required_unless_present_any = ["list", "info"])]
    pub input: Option<PathBuf>,

    /// Output WAV file.
    #[arg(required_unless_present_any = ["list", "info"])]
    pub output: Option<PathBuf>,

    /// Effect parameter as name=value; may be repeated.
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, ParameterValue)>,

    /// List all available effects.
    #[arg(short, long)]
    pub list: bool,

    /// Show the parameters of an effect.
    #[arg(short, long, value_name = "EFFECT")]
    pub info: Option<String>,

    /// Raise the log level (-v info, -vv debug, -vvv trace). RUST_LOG wins.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl CliArgs {
    pub fn parameters(&self) -> Parameters {
        self.params.iter().cloned().collect()
    }
}

fn parse_param(text: &str) -> std::result::Result<(String, ParameterValue), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", text))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{}'", text));
    }
    Ok((name.to_string(), ParameterValue::parse(value.trim())))
}

pub struct CliApp {
    available_effects: BTreeMap<String, fn() -> Box<dyn AudioEffect>>,
}

impl CliApp {
    pub fn new() -> Self {
        let mut available_effects: BTreeMap<String, fn() -> Box<dyn AudioEffect>> = BTreeMap::new();

        // Register available effects
        available_effects.insert("pitch_shift".to_string(), || {
            Box::new(PitchShiftingEffect::new())
        });
        available_effects.insert("time_stretch".to_string(), || {
            Box::new(TimeStretchingEffect::new())
        });
        available_effects.insert("robotiser".to_string(), || Box::new(RobotiserEffect::new()));
        available_effects.insert("vocal_tract".to_string(), || Box::new(VocalTractEffect::new()));

        Self { available_effects }
    }

    pub fn create_effect(&self, name: &str) -> Result<Box<dyn AudioEffect>> {
        self.available_effects
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownEffect(name.to_string()))
    }

    pub fn run(&self, args: &CliArgs) -> Result<()> {
        if args.list {
            self.list_effects();
            return Ok(());
        }

        if let Some(effect_name) = &args.info {
            return self.show_effect_info(effect_name);
        }

        match (&args.effect, &args.input, &args.output) {
            (Some(effect), Some(input), Some(output)) => {
                self.process_audio(effect, input, output, args.parameters())
            }
            _ => Err(Error::invalid_param("effect", "effect, input and output are required")),
        }
    }

    fn process_audio(
        &self,
        effect_name: &str,
        input: &Path,
        output: &Path,
        parameters: Parameters,
    ) -> Result<()> {
        let mut effect = self.create_effect(effect_name)?;

        // Load input audio
        let input_audio = read_audio_file(input)?;
        info!(
            input = %input.display(),
            effect = effect_name,
            channels = input_audio.num_channels,
            sample_rate = input_audio.sample_rate,
            seconds = input_audio.duration_seconds(),
            "processing"
        );

        // Set parameters
        if !parameters.is_empty() {
            for (key, value) in &parameters {
                info!(parameter = %key, %value, "applying parameter");
            }
            effect.set_parameters(parameters)?;
        }

        let output_audio = effect.process(&input_audio)?;
        write_audio_file(output, &output_audio.samples, output_audio.spec)?;

        println!(
            "Wrote {:.2}s to {}",
            output_audio.duration_seconds(),
            output.display()
        );
        Ok(())
    }

    fn list_effects(&self) {
        println!("Available Effects:");
        println!();
        for (effect_name, effect_factory) in &self.available_effects {
            let effect = effect_factory();
            println!("  {} - {}", effect_name, effect.name());
        }
        println!();
        println!("Use --info <effect> to see parameters for a specific effect.");
    }

    fn show_effect_info(&self, effect_name: &str) -> Result<()> {
        let effect = self.create_effect(effect_name)?;
        let params = effect.parameter_definitions();

        println!("Effect: {} ({})", effect_name, effect.name());
        println!();

        if params.is_empty() {
            println!("This effect has no configurable parameters.");
        } else {
            println!("Parameters:");
            for param in &params {
                println!("  {}", param.name);
                println!("    Description: {}", param.description);
                println!("    Default: {}", param.default_value);
                if let (Some(min), Some(max)) = (&param.min_value, &param.max_value) {
                    println!("    Range: {} to {}", min, max);
                }
                println!();
            }
        }

        println!("Example:");
        print!("  voicefxrs {} input.wav output.wav", effect_name);
        for param in params.iter().take(2) {
            print!(" -p {}={}", param.name, param.default_value);
        }
        println!();

        Ok(())
    }
}

impl Default for CliApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the log subscriber. `RUST_LOG` takes precedence over `-v`.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second call, e.g. from tests, leaves the first subscriber in place
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run_cli() {
    let args = CliArgs::parse();
    init_logging(args.verbose);
    let app = CliApp::new();

    if let Err(error) = app.run(&args) {
        eprintln!("Error: {}", error);
        eprintln!();
        eprintln!("Use --help for usage information.");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_app_creation() {
        let app = CliApp::new();
        assert_eq!(
            app.available_effects.keys().cloned().collect::<Vec<_>>(),
            vec!["pitch_shift", "robotiser", "time_stretch", "vocal_tract"]
        );
    }

    #[test]
    fn test_effect_registration() {
        let app = CliApp::new();
        assert_eq!(app.create_effect("pitch_shift").unwrap().name(), "Pitch Shifting");
        assert_eq!(app.create_effect("robotiser").unwrap().name(), "Robotiser");
        assert!(matches!(
            app.create_effect("chorus"),
            Err(Error::UnknownEffect(_))
        ));
    }

    #[test]
    fn test_parse_process_command() {
        let args = CliArgs::try_parse_from([
            "voicefxrs",
            "pitch_shift",
            "in.wav",
            "out.wav",
            "-p",
            "pitch=1.5",
            "--param",
            "time=2",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.effect.as_deref(), Some("pitch_shift"));
        assert_eq!(args.verbose, 2);
        let params = args.parameters();
        assert_eq!(params.get("pitch"), Some(&ParameterValue::Float(1.5)));
        assert_eq!(params.get("time"), Some(&ParameterValue::Int(2)));
    }

    #[test]
    fn test_parse_list_and_info() {
        let args = CliArgs::try_parse_from(["voicefxrs", "--list"]).unwrap();
        assert!(args.list);
        assert!(args.effect.is_none());

        let args = CliArgs::try_parse_from(["voicefxrs", "--info", "robotiser"]).unwrap();
        assert_eq!(args.info.as_deref(), Some("robotiser"));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(CliArgs::try_parse_from(["voicefxrs", "pitch_shift"]).is_err());
        assert!(
            CliArgs::try_parse_from(["voicefxrs", "robotiser", "a.wav", "b.wav", "-p", "oops"])
                .is_err()
        );
    }

    #[test]
    fn test_info_for_unknown_effect() {
        let app = CliApp::new();
        let args = CliArgs::try_parse_from(["voicefxrs", "--info", "reverb"]).unwrap();
        assert!(matches!(app.run(&args), Err(Error::UnknownEffect(_))));
    }
}
