use hmdlink::settings::{Setting, SettingValue, SettingsProvider};

use crate::cmd::SettingsArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_settings, OutputFormat, SettingRow};

pub fn run(args: SettingsArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = args.overrides.registry()?;
    print_settings(&rows(&registry), format);
    Ok(SUCCESS)
}

fn rows(provider: &dyn SettingsProvider) -> Vec<SettingRow> {
    Setting::ALL
        .iter()
        .map(|&setting| {
            let spec = setting.spec();
            SettingRow {
                key: setting.key(),
                kind: spec.kind.as_str(),
                value: provider.value(setting).to_string(),
                default: SettingValue::from(spec.default).to_string(),
                constraint: spec.constraint.to_string(),
                summary: spec.summary,
            }
        })
        .collect()
}
