use super::*;

impl SshSession {
    /// Connects, opens an interactive shell, waits for the first prompt and
    /// runs the dialect's setup commands.
    pub(super) async fn connect(
        device: &DeviceIdentity,
        credentials: &Credentials,
        dialect: Arc<CliDialect>,
        security_options: ConnectionSecurityOptions,
        recorder: Option<SessionRecorder>,
    ) -> Result<SshSession, DeviceError> {
        let device_addr = device.endpoint();
        let user = credentials.username.clone();

        let config = Config {
            preferred: security_options.preferred(),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (device.address.clone(), device.port),
            &user,
            AuthMethod::with_password(&credentials.password),
            security_options.server_check.clone(),
            config,
        )
        .await
        .map_err(|err| {
            if let Some(recorder) = recorder.as_ref() {
                let _ = recorder.record_event(SessionEvent::ConnectionFailed {
                    device_addr: device_addr.clone(),
                    reason: err.to_string(),
                });
            }
            DeviceError::Connection {
                device: device.to_string(),
                reason: err.to_string(),
            }
        })?;
        debug!("{user}@{device_addr} TCP connection successful");

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{device_addr} Shell request successful");

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, mut receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                if let Ok(s) = std::str::from_utf8(data)
                                    && sender_to_user.send(s.to_string()).await.is_err() {
                                        debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                        break;
                                    }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", io_task_device_addr);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
            debug!("{} SSH I/O task ended.", io_task_device_addr);
        });

        let mut buffer = String::new();
        let mut prompt = String::new();
        let mut initial_output = String::new();

        let init_result = tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                let Some(data) = receiver_from_shell.recv().await else {
                    return Err(DeviceError::ChannelDisconnectError);
                };
                trace!("{:?}", data);
                buffer.push_str(&data);
                initial_output.push_str(&data);

                while let Some(newline_pos) = buffer.find('\n') {
                    buffer.drain(..=newline_pos);
                }

                if !buffer.is_empty() {
                    if dialect.is_prompt(&buffer) {
                        prompt.push_str(&buffer);
                        return Ok(());
                    }
                    if dialect.is_more(&buffer) {
                        buffer.clear();
                        sender_to_shell.send(" ".to_string()).await?;
                    } else if let Some(answer) = dialect.confirmation_for(&buffer) {
                        buffer.clear();
                        sender_to_shell.send(answer.to_string()).await?;
                    }
                }
            }
        })
        .await;

        match init_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(DeviceError::InitTimeout(if initial_output.is_empty() {
                    "waiting for initial prompt".to_string()
                } else {
                    initial_output.clone()
                }));
            }
        }

        if let Some(session_recorder) = recorder.as_ref() {
            let _ = session_recorder.record_event(SessionEvent::ConnectionEstablished {
                device_addr: device_addr.clone(),
                prompt_after: prompt.clone(),
            });
        }

        let mut session = Self {
            client,
            sender: sender_to_shell,
            recv: receiver_from_shell,
            dialect,
            prompt,
            device_addr,
            security_options,
            recorder,
        };

        let dialect = session.dialect.clone();
        for command in dialect.setup_commands() {
            let output = session.write(command).await?;
            if !output.success {
                warn!(
                    "{} setup command '{}' failed: {}",
                    session.device_addr, command, output.content
                );
            }
        }

        Ok(session)
    }

    /// Checks if the underlying SSH connection is still active.
    pub fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    pub fn device_addr(&self) -> &str {
        &self.device_addr
    }

    pub fn security_options(&self) -> &ConnectionSecurityOptions {
        &self.security_options
    }

    /// Closes the shell and the SSH connection.
    pub async fn close(&mut self) -> Result<(), DeviceError> {
        debug!("{} closing SSH connection", self.device_addr);

        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectionClosed {
                device_addr: self.device_addr.clone(),
                reason: "client_close_called".to_string(),
                prompt_before: Some(self.prompt.clone()),
            });
        }

        self.recv.close();

        if self.is_connected() {
            if let Err(e) = self.sender.send("exit\n".to_string()).await {
                debug!("Failed to send exit command: {:?}", e);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.client.disconnect().await?;
        }

        debug!("{} SSH connection closed", self.device_addr);
        Ok(())
    }

    /// Executes a command with the default timeout of 60 seconds.
    pub async fn write(&mut self, command: &str) -> Result<Output, DeviceError> {
        self.write_with_timeout(command, Duration::from_secs(60))
            .await
    }

    /// Sends a command and collects output until the prompt comes back.
    ///
    /// Pagers are continued and confirmations answered with the dialect's
    /// answers. An error line anywhere in the output marks the result as
    /// unsuccessful.
    pub async fn write_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<Output, DeviceError> {
        let dialect = self.dialect.clone();
        let recv = &mut self.recv;
        let prompt = &mut self.prompt;
        let prompt_before = prompt.clone();

        while recv.try_recv().is_ok() {}

        self.sender.send(format!("{command}\n")).await?;

        let mut clean_output = String::new();
        let mut line_buffer = String::new();
        let mut line = String::new();

        let result = tokio::time::timeout(timeout, async {
            let mut is_error = false;
            loop {
                let Some(data) = recv.recv().await else {
                    return Err(DeviceError::ChannelDisconnectError);
                };
                if let Some(recorder) = self.recorder.as_ref() {
                    let _ = recorder.record_raw_chunk(data.clone());
                }
                line_buffer.push_str(&data);

                while let Some(newline_pos) = line_buffer.find('\n') {
                    line.clear();
                    line.extend(line_buffer.drain(..=newline_pos));
                    let trim_start = IGNORE_START_LINE.replace(&line, "");
                    if dialect.is_error_line(trim_start.trim_end()) {
                        is_error = true;
                    }
                    clean_output.push_str(&trim_start);
                }

                // The prompt arrives without a trailing newline.
                if line_buffer.is_empty() {
                    continue;
                }
                if dialect.is_prompt(&line_buffer) {
                    clean_output.push_str(&line_buffer);
                    if let Some(recorder) = self.recorder.as_ref()
                        && *prompt != line_buffer
                    {
                        let _ = recorder.record_event(SessionEvent::PromptChanged {
                            device_addr: self.device_addr.clone(),
                            prompt: line_buffer.clone(),
                        });
                    }
                    *prompt = std::mem::take(&mut line_buffer);
                    return Ok(!is_error);
                }
                if dialect.is_more(&line_buffer) {
                    line_buffer.clear();
                    self.sender.send(" ".to_string()).await?;
                } else if let Some(answer) = dialect.confirmation_for(&line_buffer) {
                    trace!("Input required: '{:?}'", answer);
                    clean_output.push_str(&line_buffer);
                    line_buffer.clear();
                    self.sender.send(answer.to_string()).await?;
                }
            }
        })
        .await;

        let success = match result {
            Err(_) => {
                self.record_command(command, &prompt_before, false, true, &clean_output, &clean_output);
                return Err(DeviceError::ExecTimeout(clean_output));
            }
            Ok(Err(err)) => {
                self.record_command(command, &prompt_before, false, false, &clean_output, &clean_output);
                return Err(err);
            }
            Ok(Ok(success)) => success,
        };

        let all = clean_output;
        let mut content = all.as_str();

        // Remove the echoed command from the beginning of the output
        if !command.is_empty() && content.starts_with(command) {
            content = content
                .strip_prefix(command)
                .unwrap_or(content)
                .trim_start_matches(['\n', '\r']);
        }

        // Remove the trailing prompt
        let content = match content.rfind('\n') {
            Some(pos) => &content[..pos],
            None => "",
        };

        let output = Output {
            success,
            content: content.to_string(),
            all: all.clone(),
            prompt: Some(self.prompt.trim().to_string()),
        };
        self.record_command(command, &prompt_before, success, false, &output.content, &all);

        Ok(output)
    }

    fn record_command(
        &self,
        command: &str,
        prompt_before: &str,
        success: bool,
        timed_out: bool,
        content: &str,
        all: &str,
    ) {
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::CommandOutput {
                device_addr: Some(self.device_addr.clone()),
                command: command.to_string(),
                prompt_before: Some(prompt_before.trim().to_string()),
                prompt_after: Some(self.prompt.trim().to_string()),
                success,
                timed_out,
                content: content.to_string(),
                all: all.to_string(),
            });
        }
    }

    pub(super) fn record_operation(&self, operation: &str, result: &Result<OpResult, DeviceError>) {
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::OperationFinished {
                device_addr: self.device_addr.clone(),
                operation: operation.to_string(),
                ok: result.is_ok(),
                detail: result.as_ref().err().map(ToString::to_string),
            });
        }
    }
}

#[async_trait]
impl CommandRunner for SshSession {
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<Output, DeviceError> {
        self.write_with_timeout(command, timeout).await
    }

    fn current_prompt(&self) -> Option<&str> {
        Some(self.prompt.trim()).filter(|p| !p.is_empty())
    }
}
