//! Outils partagés par les tests d'intégration
//!
//! `ScriptedRunner` remplace l'outil audio : les sondes répondent selon le
//! nom du fichier et le mixeur suit un comportement choisi par le test.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use spotcast::{
    BoxedReader, BroadcastController, EngineSettings, ListenerStream, ProcessRunner, ToolExit,
    ToolProcess, ToolSpec,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const SONG: &str = "conversation.mp3";

/// Réponse de la sonde pour un fichier
#[derive(Debug, Clone)]
pub enum ProbeReply {
    Bitrate(&'static str),
    Stderr(&'static str),
    SpawnError,
    Hang,
}

/// Comportement du mixeur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixBehavior {
    /// Renvoie la chanson reçue, termine quand stdin est fermé
    Echo,
    /// Produit quelques octets puis ne termine jamais
    EchoHold,
    /// Ferme sa sortie sans rien produire
    Eof,
    SpawnError,
    /// Ne produit jamais rien
    Hang,
}

pub struct ScriptedRunner {
    probes: HashMap<String, ProbeReply>,
    mixer: MixBehavior,
    calls: Mutex<Vec<ToolSpec>>,
}

impl ScriptedRunner {
    pub fn new(mixer: MixBehavior) -> Self {
        Self {
            probes: HashMap::new(),
            mixer,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn probe(mut self, file_name: &str, reply: ProbeReply) -> Self {
        self.probes.insert(file_name.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<ToolSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mixer_calls(&self) -> usize {
        self.calls().iter().filter(|spec| spec.pipe_stdin).count()
    }
}

fn finished() -> BoxFuture<'static, io::Result<ToolExit>> {
    futures::future::ready(Ok(ToolExit {
        success: true,
        code: Some(0),
    }))
    .boxed()
}

fn text(s: &str) -> BoxedReader {
    Box::pin(Cursor::new(s.as_bytes().to_vec()))
}

fn nothing() -> BoxedReader {
    Box::pin(tokio::io::empty())
}

/// A stdout that stays open until the exit future is dropped
async fn held_open(prefix: &[u8]) -> (BoxedReader, BoxFuture<'static, io::Result<ToolExit>>) {
    let (mut writer, reader) = tokio::io::duplex(64 * 1024);
    if !prefix.is_empty() {
        let _ = writer.write_all(prefix).await;
    }
    let exit = async move {
        let _writer = writer;
        std::future::pending::<io::Result<ToolExit>>().await
    }
    .boxed();
    (Box::pin(reader), exit)
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn spawn(&self, spec: ToolSpec) -> io::Result<ToolProcess> {
        self.calls.lock().unwrap().push(spec.clone());

        if !spec.pipe_stdin {
            let file = spec
                .args
                .last()
                .and_then(|arg| Path::new(arg).file_name())
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();

            return match self.probes.get(&file) {
                Some(ProbeReply::Bitrate(out)) => Ok(ToolProcess {
                    stdin: None,
                    stdout: text(out),
                    stderr: nothing(),
                    exit: finished(),
                }),
                Some(ProbeReply::Stderr(err)) => Ok(ToolProcess {
                    stdin: None,
                    stdout: nothing(),
                    stderr: text(err),
                    exit: finished(),
                }),
                Some(ProbeReply::Hang) => {
                    let (stdout, exit) = held_open(b"").await;
                    Ok(ToolProcess {
                        stdin: None,
                        stdout,
                        stderr: nothing(),
                        exit,
                    })
                }
                Some(ProbeReply::SpawnError) | None => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no such program",
                )),
            };
        }

        match self.mixer {
            MixBehavior::Echo => {
                let (stdin, stdout) = tokio::io::duplex(64 * 1024);
                Ok(ToolProcess {
                    stdin: Some(Box::pin(stdin)),
                    stdout: Box::pin(stdout),
                    stderr: text("sox WARN mp3: echo mixer\n"),
                    exit: finished(),
                })
            }
            MixBehavior::EchoHold => {
                let (stdout, exit) = held_open(b"mixed").await;
                Ok(ToolProcess {
                    stdin: Some(Box::pin(tokio::io::sink())),
                    stdout,
                    stderr: nothing(),
                    exit,
                })
            }
            MixBehavior::Eof => Ok(ToolProcess {
                stdin: Some(Box::pin(tokio::io::sink())),
                stdout: nothing(),
                stderr: text("sox FAIL formats: can't open input file\n"),
                exit: futures::future::ready(Ok(ToolExit {
                    success: false,
                    code: Some(2),
                }))
                .boxed(),
            }),
            MixBehavior::SpawnError => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no such program",
            )),
            MixBehavior::Hang => {
                let (stdout, exit) = held_open(b"").await;
                Ok(ToolProcess {
                    stdin: Some(Box::pin(tokio::io::sink())),
                    stdout,
                    stderr: nothing(),
                    exit,
                })
            }
        }
    }
}

/// Songs and effects in a temporary directory
pub struct Media {
    pub dir: TempDir,
    pub song: Vec<u8>,
}

impl Media {
    pub fn new(song_len: usize, effects: &[(&str, usize)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("songs")).unwrap();
        std::fs::create_dir_all(dir.path().join("fx")).unwrap();

        let song: Vec<u8> = (0..song_len).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("songs").join(SONG), &song).unwrap();
        for (name, len) in effects {
            std::fs::write(dir.path().join("fx").join(name), vec![0xAAu8; *len]).unwrap();
        }

        Self { dir, song }
    }

    pub fn songs_dir(&self) -> PathBuf {
        self.dir.path().join("songs")
    }

    pub fn fx_dir(&self) -> PathBuf {
        self.dir.path().join("fx")
    }

    pub fn settings(&self) -> EngineSettings {
        let mut settings = EngineSettings {
            songs_dir: self.songs_dir(),
            fx_dir: self.fx_dir(),
            current_song: SONG.to_string(),
            probe_timeout: Duration::from_millis(500),
            ..EngineSettings::default()
        };
        settings.mixer.startup_timeout = Duration::from_millis(300);
        settings
    }

    pub fn controller(&self, runner: Arc<ScriptedRunner>) -> BroadcastController {
        BroadcastController::spawn(self.settings(), runner)
    }
}

/// Reads exactly `len` bytes or fails after a few seconds
pub async fn hear(listener: &mut ListenerStream, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(10), listener.read_exact(&mut out))
        .await
        .expect("listener starved")
        .expect("listener stream failed");
    out
}
