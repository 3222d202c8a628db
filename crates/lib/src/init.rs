//! Write an example configuration file to start a deployment from.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// File name written next to the config path by `init`.
pub const EXAMPLE_CONFIG_FILE: &str = "smart48bot.yaml.example";

static EXAMPLE_CONFIG: &str = r#"telegram_token: "your bot token"
# Public host Telegram calls back on; remove to use long polling instead of a webhook.
bot_addr: "your bot webhook address"
bot_port: 8443
api_addr: "127.0.0.1"
cert_path: "cert.pem"
key_path: "privkey.pem"
webhook_path: "telegram/webhook"
log:
  file_name: "smart48bot.log"
  level: "error"
admins: [96500923, 131858248]
bot_name: "smart48"
restart_marker: "restart.fl"
text:
  help: "Для отправки сообщения (видео, фото) конкретному пользователю понадобится его ID, который автоматически присваивается всем подключенным к боту.
    В меню Интеграция приведен пример как послать сообщение. ID пользователя постоянный и не меняется пока бот не будет удален из списка контактов."
  start: "Добро пожаловать!\n\nНаш Телеграм-бот создан для отправки сообщений пользователям умных домов MimiSmart.\nВыберите действие на клавиатуре ниже."
  start_admin: "Запущен бот у нового пользователя. ID: "
  you_id: "Ваш ID: "
  error: "Команда не распознана\nВыберите действие на клавиатуре ниже."
  integration: "Данные передаются методом POST.\n
    Для отправки image: /api/smart48/image/?file=имя_файла&chat_id=id_получателя&text=текст_сообщения\n
    Для отправки video: /api/smart48/video/?file=имя_файла&chat_id=id_получателя&text=текст_сообщения\n
    Для отправки file: /api/smart48/file/?file=имя_файла&chat_id=id_получателя&text=текст_сообщения\n
    Для отправки текста: /api/smart48/msg/?chat_id=id_получателя&text=текст_сообщения\n
    Для HEX-клиентов: /api/smart48/hex/?hex=сообщение в формате id_получателя||текст_сообщения"
"#;

/// Write the example config next to `config_path` (or in the working directory).
/// Refuses to overwrite an existing example. Returns the written path.
pub fn write_example_config(config_path: &Path) -> Result<PathBuf> {
    let dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating config directory {}", dir.display()))?;
    let target = dir.join(EXAMPLE_CONFIG_FILE);
    if target.exists() {
        anyhow::bail!("{} already exists, not overwriting", target.display());
    }
    std::fs::write(&target, EXAMPLE_CONFIG)
        .with_context(|| format!("writing example config to {}", target.display()))?;
    log::info!("wrote example config to {}", target.display());
    Ok(target)
}
